#[macro_use]
extern crate serde;

mod armor;
mod config;
mod ecies;
mod envelope;
mod error;
mod keys;
mod lifecycle;
mod linking;
mod locks;
mod notify;
mod receipt;
mod role;
mod status;
mod store;
mod util;
mod vote;

pub use armor::*;
pub use config::*;
pub use envelope::*;
pub use error::*;
pub use keys::*;
pub use lifecycle::*;
pub use linking::*;
pub use locks::*;
pub use notify::*;
pub use receipt::*;
pub use role::*;
pub use status::*;
pub use store::*;
pub use util::*;
pub use vote::*;
