pub mod database;
pub mod dto;
pub mod postgres;
pub mod repositories;
pub mod stores;
