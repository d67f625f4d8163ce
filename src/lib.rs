//! OpenMusic - a REST catalog of albums, songs and collaborative playlists
//!
//! This library provides the storage layer, authentication and HTTP router
//! behind the `open-music` server binary.

pub mod albums;
pub mod auth;
pub mod authentications;
pub mod cache;
pub mod collaborations;
pub mod config;
pub mod db;
pub mod error;
pub mod likes;
pub mod playlist;
pub mod producer;
pub mod server;
pub mod songs;
pub mod storage;
pub mod tokenize;
pub mod users;
pub mod validator;
