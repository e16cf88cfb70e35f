pub mod app;
pub mod auth;
pub mod bookings;
pub mod config;
pub mod error;
pub mod extract;
pub mod factory;
pub mod images;
pub mod mail;
pub mod payments;
pub mod query;
pub mod response;
pub mod reviews;
pub mod state;
pub mod storage;
pub mod store;
pub mod tours;
pub mod users;
pub mod views;

#[cfg(test)]
mod testing;
