//! Device-control abstraction
//!
//! The connection pool only talks to these traits; the Cast v2 implementation
//! lives in [`crate::cast`].

mod traits;

pub use traits::{
    DeviceControl, DeviceError, DeviceStatus, DeviceTransport, MediaLoad, QueueKind,
    QueueOperation, VolumeChange, VolumeStatus,
};
