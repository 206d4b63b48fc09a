//! # Repository Layer
//!
//! One repository per aggregate. Each wraps the shared pool and exposes
//! typed operations; multi-row writes run inside a transaction.
//!
//! ## Conventions
//! - `get_by_id` returns `DbResult<Option<T>>`; the call site decides
//!   whether a missing row is an error
//! - Guarded writes re-check business conditions in the UPDATE itself and
//!   re-SELECT on zero rows affected to produce the right typed error
//! - Notifications are inserted in the same transaction as the state
//!   change they announce

pub mod coupon;
pub mod delivery;
pub mod inventory;
pub mod notification;
pub mod order;
pub mod payment;
pub mod product;
pub mod reservation;

pub use coupon::{CouponRepository, NewCoupon};
pub use delivery::DeliveryRepository;
pub use inventory::InventoryRepository;
pub use notification::NotificationRepository;
pub use order::{NewOrder, NewOrderLine, OrderRepository};
pub use payment::PaymentRepository;
pub use product::ProductRepository;
pub use reservation::ReservationRepository;
