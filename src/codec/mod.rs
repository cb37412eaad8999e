//! Conversion between nested configuration values and flat store keys.
//!
//! [`flatten`] turns a value tree into one [`KvPair`](crate::store::KvPair)
//! per leaf; [`decode`] patches a typed target from such pairs.

mod decode;
mod flatten;
pub mod path;

pub use decode::{decode, decode_value, decode_value_with_delimiter};
pub use flatten::{flatten, flatten_serializable, flatten_with_delimiter, stringify};
pub use path::KEY_DELIMITER;
