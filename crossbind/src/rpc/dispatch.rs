//! Callee-side dispatch: one channel handler per exposed method.
//!
//! The handler restores the inbound argument list, runs the real method, and
//! encodes exactly one reply. Relayed throws become relay-tagged replies;
//! everything else that fails resolves the caller with a content-free
//! internal-failure reply and goes to the diagnostic sink locally.

use std::cell::RefCell;
use std::rc::Rc;

use futures::FutureExt;

use crate::channel::Channel;
use crate::restore::{restore_args, unpack_args, wrap_thrown, TypeRegistry, THROWN_WRAPPER_TAG};
use crate::rpc::registry::{method_channel, MethodHandler};
use crate::rpc::relay::HandlerError;
use crate::rpc::ReplyWire;

/// Callback receiving every error that failed to relay. Logging only; the
/// return value is ignored.
pub type DiagnosticSink = Rc<dyn Fn(&anyhow::Error)>;

/// Shared, settable slot for the diagnostic sink.
pub(crate) type SharedSink = Rc<RefCell<Option<DiagnosticSink>>>;

fn report(sink: &SharedSink, error: &anyhow::Error) {
    let callback = sink.borrow().clone();
    if let Some(callback) = callback {
        callback(error);
    }
}

/// Install the channel handler for one method of one exposed API.
///
/// Installation is permanent for the life of the channel.
pub(crate) fn install_method<C: Channel + 'static>(
    channel: &Rc<C>,
    api: &str,
    method: &str,
    handler: MethodHandler,
    recovery: Rc<TypeRegistry>,
    sink: SharedSink,
) {
    let name = method_channel(api, method);
    let api = api.to_string();
    let method = method.to_string();

    channel.handle(
        &name,
        Rc::new(move |payload| {
            let handler = handler.clone();
            let recovery = recovery.clone();
            let sink = sink.clone();
            let api = api.clone();
            let method = method.clone();

            async move {
                let (values, infos) = match unpack_args(payload) {
                    Ok(parts) => parts,
                    Err(e) => {
                        tracing::error!(api = %api, method = %method, error = %e, "rejecting malformed call payload");
                        report(&sink, &anyhow::Error::new(e));
                        return ReplyWire::Internal.encode();
                    }
                };
                let args = restore_args(values, &infos, Some(&recovery));
                tracing::debug!(api = %api, method = %method, args = args.len(), "dispatching call");

                match handler(args).await {
                    Ok(result) if result.class_name() == Some(THROWN_WRAPPER_TAG) => {
                        // The sentinel is reserved for values that crossed as
                        // throws; producing it as a return value is a
                        // programming error on the callee side.
                        let err = anyhow::anyhow!(
                            "method '{method}' on api '{api}' returned the reserved thrown-value wrapper"
                        );
                        tracing::error!(api = %api, method = %method, "handler returned the relay wrapper instead of throwing it");
                        report(&sink, &err);
                        ReplyWire::Internal.encode()
                    }
                    Ok(result) => {
                        let info = result.info(None);
                        ReplyWire::Success {
                            value: result.into_value(),
                            info,
                        }
                        .encode()
                    }
                    Err(HandlerError::Relay(thrown)) => {
                        tracing::debug!(api = %api, method = %method, "relaying thrown value to caller");
                        let (value, info) = wrap_thrown(thrown);
                        ReplyWire::Thrown { value, info }.encode()
                    }
                    Err(HandlerError::Internal(error)) => {
                        tracing::error!(api = %api, method = %method, error = %error, "unrelayed handler error stays local");
                        report(&sink, &error);
                        ReplyWire::Internal.encode()
                    }
                }
            }
            .boxed_local()
        }),
    );
}
