pub mod markup;
pub mod model;
pub mod permission;
pub mod thumbnail;
pub mod util;
