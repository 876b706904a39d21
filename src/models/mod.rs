pub mod comment;
pub mod image;
pub mod post;
pub mod response;
pub mod tag;
pub mod user;

pub use comment::*;
pub use image::*;
pub use post::*;
pub use response::*;
pub use tag::*;
pub use user::*;
