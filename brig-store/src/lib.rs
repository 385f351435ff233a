#![doc = include_str!("../README.md")]

mod entities;
mod error;
mod external;
mod linked;
mod lock;
pub mod schema;
mod store;

pub use entities::{
    AvailablePackage, CertificateRecord, ConfigurationInfo, ConfigurationLink, Repository,
    RepositoryFragment, SelectedPackage,
};
pub use error::Error;
pub use external::source_checksum;
pub use linked::ConfigurationType;
pub use store::{OPEN_CONFIGURATIONS_VAR, OpenOptions, Store, StoreTransaction};
