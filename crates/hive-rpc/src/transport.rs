//! Transport seams between the bus and whatever carries its messages.

use tokio::sync::mpsc;

use crate::error::RpcResult;
use crate::message::{Request, Response};

/// Client side: submits requests and owns reply channels.
pub trait RequestTransport: Send + Sync {
    /// Hand a request to the transport for its partition.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is closed.
    fn submit(&self, request: Request) -> RpcResult<()>;

    /// Open a named reply channel. Reopening a name replaces the previous receiver.
    fn open_reply_topic(&self, topic: &str) -> mpsc::UnboundedReceiver<Response>;

    /// Close a reply channel. Later responses addressed to it are dropped.
    fn close_reply_topic(&self, topic: &str);
}

/// Server side: delivers responses to a reply channel.
pub trait MessageDispatcher: Send + Sync {
    /// Send a response to `reply_to`.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply channel no longer exists.
    fn dispatch(&self, reply_to: &str, response: Response) -> RpcResult<()>;
}
