//! Request routing: the ordered route table and its matcher.

pub mod matcher;

pub use matcher::{RouteMatch, RouteTable};
