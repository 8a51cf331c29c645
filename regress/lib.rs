pub mod data;
pub mod glm;
