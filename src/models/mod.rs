pub mod child_profile;

pub use child_profile::ChildProfile;
