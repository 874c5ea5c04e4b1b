pub mod classes;
pub mod core;
pub mod materials;
pub mod notifications;
pub mod subjects;
pub mod updates;
pub mod users;
