//! Creation arguments for a pre-launched engine instance.
//!
//! The argument set is the cache key for pre-launching: a host compares the
//! arguments it cached on a previous run against the arguments it wants now,
//! and discards the pre-launched instance when they differ. Equality is
//! field-for-field; the persisted form is a flat JSON object with stable
//! field names (the file-level contract lives in `prewarm-runtime`'s store).

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Release channels eligible when locating the engine executable.
    ///
    /// Stored on the wire as the raw `release_channels_mask` byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReleaseChannels: u8 {
        const STABLE = 1 << 0;
        const BETA = 1 << 1;
        const DEV = 1 << 2;
        const CANARY = 1 << 3;
    }
}

/// Search strategy among the eligible release channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelSearchKind {
    /// Prefer the most stable eligible channel.
    #[default]
    MostStable,
    /// Prefer the least stable eligible channel.
    LeastStable,
}

impl ChannelSearchKind {
    /// Wire encoding of the search kind.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::MostStable => 0,
            Self::LeastStable => 1,
        }
    }

    /// Decode the wire byte; unknown values fall back to `MostStable`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::LeastStable,
            _ => Self::MostStable,
        }
    }
}

/// Arguments an engine instance is created from.
///
/// Two values are equal iff every field is equal, and that equality is the
/// sole signal a host uses to decide whether a cached pre-launch is still
/// valid. The serialized document is strict: unknown fields are rejected and
/// missing fields fail deserialization, so a cache written under a different
/// layout reads as malformed rather than as a half-filled value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineCreationArguments {
    /// Path to the engine's host executable; empty means "use the default".
    pub engine_exe_path: String,
    /// Persistent storage location for the created resource.
    pub data_dir: String,
    /// Opaque pass-through flags string.
    pub extra_args: String,
    /// Locale identifier, e.g. `en-US`.
    pub language: String,
    /// Bitmask of eligible release channels (see [`ReleaseChannels`]).
    pub release_channels_mask: u8,
    /// Channel search strategy (see [`ChannelSearchKind`]).
    pub channel_search_kind: u8,
    /// Privacy feature toggle passed through to the engine.
    pub tracking_prevention_enabled: bool,
}

impl EngineCreationArguments {
    /// Empty argument set: default executable, no data dir, no channels.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            engine_exe_path: String::new(),
            data_dir: String::new(),
            extra_args: String::new(),
            language: String::new(),
            release_channels_mask: 0,
            channel_search_kind: 0,
            tracking_prevention_enabled: false,
        }
    }

    #[must_use]
    pub fn with_engine_exe_path(mut self, path: impl Into<String>) -> Self {
        self.engine_exe_path = path.into();
        self
    }

    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<String>) -> Self {
        self.data_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_extra_args(mut self, args: impl Into<String>) -> Self {
        self.extra_args = args.into();
        self
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    #[must_use]
    pub fn with_release_channels(mut self, channels: ReleaseChannels) -> Self {
        self.release_channels_mask = channels.bits();
        self
    }

    #[must_use]
    pub fn with_search_kind(mut self, kind: ChannelSearchKind) -> Self {
        self.channel_search_kind = kind.as_u8();
        self
    }

    #[must_use]
    pub fn with_tracking_prevention(mut self, enabled: bool) -> Self {
        self.tracking_prevention_enabled = enabled;
        self
    }

    /// Typed view of `release_channels_mask`; unknown bits are dropped.
    #[must_use]
    pub const fn release_channels(&self) -> ReleaseChannels {
        ReleaseChannels::from_bits_truncate(self.release_channels_mask)
    }

    /// Typed view of `channel_search_kind`.
    #[must_use]
    pub const fn search_kind(&self) -> ChannelSearchKind {
        ChannelSearchKind::from_u8(self.channel_search_kind)
    }
}

impl Default for EngineCreationArguments {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_args() -> EngineCreationArguments {
        EngineCreationArguments::new()
            .with_engine_exe_path("/opt/engine/bin/engine-host")
            .with_data_dir("/var/lib/engine/profile")
            .with_extra_args("--disable-gpu-compositing")
            .with_language("en-US")
            .with_release_channels(ReleaseChannels::STABLE | ReleaseChannels::BETA)
            .with_search_kind(ChannelSearchKind::LeastStable)
            .with_tracking_prevention(true)
    }

    #[test]
    fn test_equality_is_field_for_field() {
        let a = sample_args();
        let b = sample_args();
        assert_eq!(a, b);

        let c = b.with_language("de-DE");
        assert_ne!(a, c);
    }

    #[test]
    fn test_json_round_trip_preserves_all_fields() {
        let args = sample_args();
        let json = serde_json::to_string(&args).unwrap();
        let back: EngineCreationArguments = serde_json::from_str(&json).unwrap();
        assert_eq!(args, back);
    }

    #[test]
    fn test_field_names_are_stable_on_the_wire() {
        let json = serde_json::to_value(sample_args()).unwrap();
        let object = json.as_object().unwrap();
        for field in [
            "engine_exe_path",
            "data_dir",
            "extra_args",
            "language",
            "release_channels_mask",
            "channel_search_kind",
            "tracking_prevention_enabled",
        ] {
            assert!(object.contains_key(field), "missing field {field}");
        }
        assert_eq!(object.len(), 7);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let json = r#"{
            "engine_exe_path": "",
            "data_dir": "",
            "extra_args": "",
            "language": "",
            "release_channels_mask": 0,
            "channel_search_kind": 0,
            "tracking_prevention_enabled": false,
            "surprise": true
        }"#;
        assert!(serde_json::from_str::<EngineCreationArguments>(json).is_err());
    }

    #[test]
    fn test_missing_fields_fail_deserialization() {
        let json = r#"{ "engine_exe_path": "/usr/bin/engine" }"#;
        assert!(serde_json::from_str::<EngineCreationArguments>(json).is_err());
    }

    #[test]
    fn test_channel_views_round_trip_the_raw_bytes() {
        let args = sample_args();
        assert_eq!(
            args.release_channels(),
            ReleaseChannels::STABLE | ReleaseChannels::BETA
        );
        assert_eq!(args.search_kind(), ChannelSearchKind::LeastStable);
        assert_eq!(
            ChannelSearchKind::from_u8(ChannelSearchKind::LeastStable.as_u8()),
            ChannelSearchKind::LeastStable
        );
        assert_eq!(ChannelSearchKind::from_u8(42), ChannelSearchKind::MostStable);
    }
}
