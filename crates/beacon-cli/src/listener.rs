//! Wiring between the connector and the log output.
//!
//! Every configured subscription is joined, each received event is logged
//! as one line with its JSON payload, and lifecycle and presence changes are
//! logged and counted.

use crate::config::{Config, Subscription};
use crate::metrics;
use anyhow::{Context, Result};
use beacon_core::{
    BeaconError, ChannelKind, ClientEvent, Connector, LifecycleEvent, Member, RawEvent,
    WeakPresenceChannel,
};
use tracing::{error, info, warn};

/// Register lifecycle logging and join every configured subscription.
///
/// # Errors
///
/// Returns an error if the connector has no transport or a subscription
/// names an invalid channel.
pub fn watch(connector: &Connector, config: &Config) -> Result<()> {
    for kind in [
        ClientEvent::Connect,
        ClientEvent::Disconnect,
        ClientEvent::Reconnect,
        ClientEvent::Error,
    ] {
        connector.on_client_event(kind, log_lifecycle)?;
    }

    for subscription in &config.subscriptions {
        join(connector, subscription)
            .with_context(|| format!("Failed to join channel {}", subscription.channel))?;
    }

    metrics::set_active_channels(connector.registry().len());
    info!(channels = ?connector.registry().names(), "Listening");
    Ok(())
}

fn log_lifecycle(event: &LifecycleEvent) {
    match event {
        LifecycleEvent::Connected { session_id } => {
            metrics::record_lifecycle("connect");
            info!(socket_id = %session_id, "Connected");
        }
        LifecycleEvent::Reconnected { session_id } => {
            metrics::record_lifecycle("reconnect");
            info!(socket_id = %session_id, "Reconnected");
        }
        LifecycleEvent::Disconnected { reason } => {
            metrics::record_lifecycle("disconnect");
            warn!(reason = %reason, "Disconnected");
        }
        LifecycleEvent::Error { message } => {
            metrics::record_lifecycle("error");
            error!(error = %message, "Connection error");
        }
    }
}

fn join(connector: &Connector, subscription: &Subscription) -> Result<()> {
    let name = subscription.channel.as_str();
    let channel = match ChannelKind::from(subscription.kind) {
        ChannelKind::Public => connector.channel(name)?,
        ChannelKind::Private => connector.private_channel(name)?,
        ChannelKind::Presence => {
            let presence = connector.presence_channel(name)?;
            let (here, joining, leaving) = (
                presence.downgrade(),
                presence.downgrade(),
                presence.downgrade(),
            );
            presence
                .here(move |members: &[Member]| {
                    let name = record_members(&here);
                    info!(channel = %name, count = members.len(), "Members present");
                })
                .joining(move |member: &Member| {
                    let name = record_members(&joining);
                    info!(channel = %name, member = %member.id, info = %member.info, "Member joined");
                })
                .leaving(move |member: &Member| {
                    let name = record_members(&leaving);
                    info!(channel = %name, member = %member.id, "Member left");
                });
            presence.channel().clone()
        }
    };

    let name = channel.name().to_string();
    channel.error(move |e: &BeaconError| {
        metrics::record_error(&name);
        error!(channel = %name, error = %e, "Subscription error");
    });

    for event in &subscription.events {
        channel.listen(event, print_event);
    }
    Ok(())
}

/// Publish the member count of a presence channel and return its name.
fn record_members(presence: &WeakPresenceChannel) -> String {
    match presence.upgrade() {
        Some(presence) => {
            metrics::set_presence_members(presence.name(), presence.member_count());
            presence.name().to_string()
        }
        None => String::new(),
    }
}

fn print_event(event: &RawEvent) {
    let channel = event.channel.as_deref().unwrap_or_default();
    metrics::record_event(channel);
    info!(channel, event = %event.event, data = %event.data, "Event");
}
