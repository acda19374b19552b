pub mod attendance;
pub mod benefit;
pub mod employee;
pub mod leave;
pub mod organization;
pub mod role;
pub mod user;
pub mod working_shift;
