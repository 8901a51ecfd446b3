//! Agent configuration: the local bootstrap file and the remotely-pushed twin.

pub mod duration;
pub mod local;
pub mod twin;

pub use local::{LocalConfigError, LocalConfiguration, Severity};
pub use twin::{
    EventPriority, FieldStatus, LastUpdateResult, TwinBundle, TwinBundleStatus, TwinConfiguration,
    TwinError, TwinUpdateData,
};
