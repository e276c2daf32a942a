pub(crate) mod analytics;
pub(crate) mod data;
pub(crate) mod health;
