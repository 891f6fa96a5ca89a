pub mod connection;
pub mod dispatcher;
pub mod feed;
pub mod subscription;
pub mod token;
