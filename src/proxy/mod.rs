// Proxy module - handles request translation, routing and upstream calls

pub mod router;
pub mod schema;
pub mod tools;
pub mod translator;
pub mod upstream;
