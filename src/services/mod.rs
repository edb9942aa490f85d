pub mod answer;
pub mod feedback;
pub mod interval_policy;
pub mod phrase_selector;
pub mod profile;
pub mod session;
