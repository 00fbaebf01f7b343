//! Synth definitions.
//!
//! The engine never builds signal graphs. A `SynthDef` is an opaque, named
//! artifact; the only property the engine inspects is whether it carries a
//! `gate` control, which decides between a release and a hard free.

use serde::{Deserialize, Serialize};

use crate::component::WriteMode;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SynthDef {
    pub name: String,
    pub has_gate: bool,
}

impl SynthDef {
    pub fn new(name: impl Into<String>, has_gate: bool) -> Self {
        Self {
            name: name.into(),
            has_gate,
        }
    }

    /// Gain, activity and output fader for a component's main bus.
    pub fn channel_strip(channel_count: usize) -> Self {
        Self::new(format!("patchbay:channel-strip:{}", channel_count), true)
    }

    /// Writes peak levels of an audio bus into a control bus.
    pub fn meters(channel_count: usize) -> Self {
        Self::new(format!("patchbay:meters:{}", channel_count), false)
    }

    /// Copies audio between buses of possibly different widths, summing into
    /// the target.
    pub fn patch_cable(source: usize, target: usize) -> Self {
        Self::new(format!("patchbay:patch-cable:{}x{}", source, target), true)
    }

    pub fn patch_cable_with_mode(source: usize, target: usize, mode: WriteMode) -> Self {
        match mode {
            WriteMode::Sum => Self::patch_cable(source, target),
            WriteMode::Mix => {
                Self::new(format!("patchbay:patch-cable:{}x{}:mix", source, target), true)
            }
            WriteMode::Replace => Self::new(
                format!("patchbay:patch-cable:{}x{}:replace", source, target),
                true,
            ),
        }
    }

    /// Patch cable that reads the previous block, for edges running
    /// backwards in graph order.
    pub fn feedback_patch_cable(source: usize, target: usize) -> Self {
        Self::new(format!("patchbay:fb-patch-cable:{}x{}", source, target), true)
    }

    /// Writes silence.
    pub fn zero(channel_count: usize) -> Self {
        Self::new(format!("patchbay:zero:{}", channel_count), false)
    }

    pub fn device(name: &str, channel_count: usize) -> Self {
        Self::new(format!("patchbay:device-{}:{}", name, channel_count), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_encode_channel_counts() {
        assert_eq!(SynthDef::channel_strip(2).name, "patchbay:channel-strip:2");
        assert_eq!(SynthDef::meters(4).name, "patchbay:meters:4");
        assert_eq!(SynthDef::patch_cable(2, 1).name, "patchbay:patch-cable:2x1");
        assert_eq!(
            SynthDef::feedback_patch_cable(2, 2).name,
            "patchbay:fb-patch-cable:2x2"
        );
        assert_eq!(SynthDef::zero(2).name, "patchbay:zero:2");
        assert_eq!(
            SynthDef::device("dc-tester", 2).name,
            "patchbay:device-dc-tester:2"
        );
    }

    #[test]
    fn test_write_modes() {
        assert_eq!(
            SynthDef::patch_cable_with_mode(2, 2, WriteMode::Sum),
            SynthDef::patch_cable(2, 2)
        );
        assert_eq!(
            SynthDef::patch_cable_with_mode(2, 4, WriteMode::Mix).name,
            "patchbay:patch-cable:2x4:mix"
        );
        assert_eq!(
            SynthDef::patch_cable_with_mode(2, 4, WriteMode::Replace).name,
            "patchbay:patch-cable:2x4:replace"
        );
    }

    #[test]
    fn test_gate_flags() {
        assert!(SynthDef::channel_strip(2).has_gate);
        assert!(SynthDef::patch_cable(2, 2).has_gate);
        assert!(SynthDef::device("dc-tester", 2).has_gate);
        assert!(!SynthDef::meters(2).has_gate);
        assert!(!SynthDef::zero(2).has_gate);
    }
}
