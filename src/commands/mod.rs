pub mod detect;
pub mod inspect;
pub mod migrate;
