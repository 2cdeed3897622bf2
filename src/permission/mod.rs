//! Camera permission gating.
//!
//! The permission itself is owned by the platform; this module only asks
//! for it and turns a grant into a [`CameraAccess`] token. Camera resources
//! can only be created with that token in hand.

mod gate;

pub use gate::{
    CameraAccess, FixedPermission, LogDeniedHook, PermissionDeniedHook, PermissionGate,
    PermissionKind, PermissionProvider, PermissionState,
};
