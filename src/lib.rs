pub mod db;
pub mod error;
pub mod form;
pub mod model;
pub mod ops;
pub mod output;
pub mod validate;
pub mod web;
