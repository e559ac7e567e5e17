/// The `atomedit apply` command.
pub mod apply;
/// The `atomedit hash` command.
pub mod hash;
/// The `atomedit validate` command.
pub mod validate;

pub use apply::apply;
pub use hash::hash;
pub use validate::validate;
