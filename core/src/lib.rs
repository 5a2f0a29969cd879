pub mod case;
pub mod error;
pub mod follow_up;
pub mod intent;
pub mod keys;
pub mod proposal;
pub mod run;
