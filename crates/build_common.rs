// Shared build script utilities for README-to-rustdoc embedding.
// Include this in build.rs files with: include!("../build_common.rs");
//
// Required imports in the including file:
//   use std::env;
//   use std::fs;
//   use std::path::Path;

/// Copy a crate's README.md into `$OUT_DIR/README_GENERATED.md` so lib.rs can
/// embed it as crate-level rustdoc.
///
/// Repository-relative markdown links do not resolve under rustdoc, so
/// `[text](relative/path)` becomes plain `text`. Absolute (`http`) links and
/// in-page anchors are kept as-is. A missing README still produces a stub file
/// so the `include_str!` in lib.rs never breaks the build.
fn process_readme_for_rustdoc(crate_dir: &str) {
    println!("cargo:rerun-if-changed=README.md");

    let readme_path = Path::new(crate_dir).join("README.md");
    let rustdoc_content = match fs::read_to_string(&readme_path) {
        Ok(content) => strip_relative_links(&content),
        Err(_) => String::from("README.md is missing for this crate.\n"),
    };

    let out_dir = env::var("OUT_DIR").unwrap();
    let dest_path = Path::new(&out_dir).join("README_GENERATED.md");
    fs::write(dest_path, rustdoc_content).unwrap();
}

/// Replace `[text](target)` with `text` for every non-absolute, non-anchor
/// link target. Single-pass scanner; anything that is not a well-formed link
/// is copied through untouched.
fn strip_relative_links(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(open) = rest.find('[') {
        let (head, tail) = rest.split_at(open);
        out.push_str(head);

        let Some(close) = tail.find("](") else {
            out.push_str(tail);
            return out;
        };
        let Some(end) = tail[close..].find(')') else {
            out.push_str(tail);
            return out;
        };

        let text = &tail[1..close];
        let target = &tail[close + 2..close + end];
        if target.starts_with("http") || target.starts_with('#') {
            out.push_str(&tail[..=close + end]);
        } else {
            out.push_str(text);
        }
        rest = &tail[close + end + 1..];
    }

    out.push_str(rest);
    out
}
