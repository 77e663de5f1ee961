pub mod client;
pub mod outbound;

pub use client::{endpoint_url, BoxSocket, Connector, Socket, WebSocketConnector};
pub use outbound::{AudioSender, FrameCounters, LinkState, Offer, OutboundSlot};
