pub mod billing;
pub mod users;

pub use billing::PgEntitlementStore;
