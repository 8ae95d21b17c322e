/// One message as delivered by the bus.
///
/// `partition` and `offset` identify the message's position for commits;
/// the handler only ever sees `key` and `value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Delivery acknowledgment for a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub partition: u32,
    pub offset: u64,
}
