pub mod connection;
pub mod publish;
pub mod receiver;
pub mod sender;
pub mod topology;

pub use connection::{ConnectionError, Session};
pub use publish::{ExchangePublisher, MessagePublisher, PublishError};
pub use receiver::{ConsumeError, DeliverySource, QueueSource, Receiver, ReceiverOutcome};
pub use sender::{Sender, SenderOutcome};
pub use topology::{BindError, Topology};
