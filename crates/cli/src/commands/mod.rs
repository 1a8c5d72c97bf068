pub mod inspect;
pub mod resume;
pub mod run;
