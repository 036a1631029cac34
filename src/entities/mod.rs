pub mod address;
pub mod cart;
pub mod cart_line;
pub mod order;
pub mod payment_method;
pub mod product;
pub mod user;
