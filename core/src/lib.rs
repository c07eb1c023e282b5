pub mod battle;
pub mod damage;
pub mod error;
pub mod model;
pub mod reliability;
pub mod wire;

pub use battle::*;
pub use damage::*;
pub use error::*;
pub use model::*;
pub use reliability::*;
pub use wire::*;
