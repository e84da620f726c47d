pub mod buffer;
pub mod context;
pub mod usecases;
