pub mod dtos;
pub mod order_status;
pub mod presence_state;
