//! Event subscription bitmask.
//!
//! Normal categories are combined in [`ALL`]. High-volume categories are
//! opt-in only and each carries a reference count on the server so the
//! producer can be switched off while nobody listens.

/// No events.
pub const NONE: u64 = 0;
/// General events.
pub const GENERAL: u64 = 1 << 0;
/// Config events.
pub const CONFIG: u64 = 1 << 1;
/// Scene events.
pub const SCENES: u64 = 1 << 2;
/// Input events.
pub const INPUTS: u64 = 1 << 3;
/// Transition events.
pub const TRANSITIONS: u64 = 1 << 4;
/// Filter events.
pub const FILTERS: u64 = 1 << 5;
/// Output events.
pub const OUTPUTS: u64 = 1 << 6;
/// Scene item events.
pub const SCENE_ITEMS: u64 = 1 << 7;
/// Media input events.
pub const MEDIA_INPUTS: u64 = 1 << 8;

/// Every normal category.
pub const ALL: u64 =
    GENERAL | CONFIG | SCENES | INPUTS | TRANSITIONS | FILTERS | OUTPUTS | SCENE_ITEMS | MEDIA_INPUTS;

/// High-volume: input volume meters.
pub const INPUT_VOLUME_METERS: u64 = 1 << 9;
/// High-volume: input active state changes.
pub const INPUT_ACTIVE_STATE_CHANGED: u64 = 1 << 10;
/// High-volume: input show state changes.
pub const INPUT_SHOW_STATE_CHANGED: u64 = 1 << 11;
/// High-volume: scene item transform changes.
pub const SCENE_ITEM_TRANSFORM_CHANGED: u64 = 1 << 12;

/// Whether an event with `intent` should reach a session subscribed to `mask`.
pub fn intersects(mask: u64, intent: u64) -> bool {
    mask & intent != 0
}

/// A reference-counted high-volume category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HighVolumeCategory {
    /// [`INPUT_VOLUME_METERS`]
    InputVolumeMeters,
    /// [`INPUT_ACTIVE_STATE_CHANGED`]
    InputActiveStateChanged,
    /// [`INPUT_SHOW_STATE_CHANGED`]
    InputShowStateChanged,
    /// [`SCENE_ITEM_TRANSFORM_CHANGED`]
    SceneItemTransformChanged,
}

impl HighVolumeCategory {
    /// Every high-volume category, in bit order.
    pub const ALL: [Self; 4] = [
        Self::InputVolumeMeters,
        Self::InputActiveStateChanged,
        Self::InputShowStateChanged,
        Self::SceneItemTransformChanged,
    ];

    /// Subscription bit.
    pub fn bit(self) -> u64 {
        match self {
            Self::InputVolumeMeters => INPUT_VOLUME_METERS,
            Self::InputActiveStateChanged => INPUT_ACTIVE_STATE_CHANGED,
            Self::InputShowStateChanged => INPUT_SHOW_STATE_CHANGED,
            Self::SceneItemTransformChanged => SCENE_ITEM_TRANSFORM_CHANGED,
        }
    }

    /// Position in [`Self::ALL`].
    pub fn index(self) -> usize {
        match self {
            Self::InputVolumeMeters => 0,
            Self::InputActiveStateChanged => 1,
            Self::InputShowStateChanged => 2,
            Self::SceneItemTransformChanged => 3,
        }
    }

    /// Event name of the category.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InputVolumeMeters => "InputVolumeMeters",
            Self::InputActiveStateChanged => "InputActiveStateChanged",
            Self::InputShowStateChanged => "InputShowStateChanged",
            Self::SceneItemTransformChanged => "SceneItemTransformChanged",
        }
    }

    /// High-volume categories present in `mask`.
    pub fn in_mask(mask: u64) -> impl Iterator<Item = Self> {
        Self::ALL.into_iter().filter(move |c| mask & c.bit() != 0)
    }
}
