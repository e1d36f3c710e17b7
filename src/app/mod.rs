mod menu;
mod state;
mod types;

pub use state::Navigator;
