//! SMS fallback channel: wire codec and transport abstraction.

pub mod codec;
pub mod transport;

pub use codec::{GatewayReply, SmsPayload, MAX_SMS_LEN};
pub use transport::{
    CostApprover, FlatRateCostProvider, InboundSms, MockSmsTransport, SmsCostProvider,
    SmsTransport,
};
