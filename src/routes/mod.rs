pub mod admin;
pub mod auth;
pub mod comments;
pub mod health;
pub mod images;
pub mod posts;
pub mod tags;
pub mod users;

pub use admin::admin_routes;
pub use auth::auth_routes;
pub use comments::comments_routes;
pub use images::images_routes;
pub use posts::posts_routes;
pub use tags::tags_routes;
pub use users::users_routes;
