use std::collections::HashMap;
use std::fmt;

use slog::warn;

use crate::processor::{Context, EventProcessor, Handled, ProcessorRef};
use crate::{AnyMessage, Message};

/// Well-known id of the subscriptions processor.
pub const SUBSCRIPTIONS_ID: &str = "subscriptions";

/// Name of the dedicated dispatcher the subscriptions processor lives in.
pub const SUBSCRIPTIONS_DISPATCHER: &str = "subscriptions";

/// Channels let subscribers filter broadcasts by interest.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Channel(String);

impl Channel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'a> From<&'a str> for Channel {
    fn from(channel: &str) -> Self {
        Channel(channel.to_string())
    }
}

impl From<String> for Channel {
    fn from(channel: String) -> Self {
        Channel(channel)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type Subs = HashMap<Channel, Vec<ProcessorRef>>;

/// The well-known processor mediating pub/sub.
///
/// Because it is an ordinary processor on its own dispatcher, all
/// mutation of subscription state is single-threaded through its mailbox
/// and needs no locks of its own. Stopping a subscriber does NOT remove
/// it from these lists; subscribers unsubscribe in their own stop path.
pub(crate) struct Subscriptions {
    channels: Subs,
}

impl Subscriptions {
    pub fn new() -> Self {
        Subscriptions {
            channels: HashMap::new(),
        }
    }

    fn subscribed_channels(&self, processor: &ProcessorRef) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self
            .channels
            .iter()
            .filter(|(_, subs)| subs.iter().any(|s| s.id() == processor.id()))
            .map(|(channel, _)| channel.clone())
            .collect();
        channels.sort();
        channels
    }

    fn reply_subscribed(&self, processor: &ProcessorRef) {
        let reply = Subscribed {
            channels: self.subscribed_channels(processor),
        };
        let _ = processor.post(Message::Subscribed(reply));
    }

    fn subscribe(&mut self, msg: &Subscribe) {
        for channel in &msg.channels {
            let subs = self.channels.entry(channel.clone()).or_default();
            if !subs.iter().any(|s| s.id() == msg.processor.id()) {
                subs.push(msg.processor.clone());
            }
        }
        self.reply_subscribed(&msg.processor);
    }

    fn set_subscription(&mut self, msg: &SetSubscription) {
        for subs in self.channels.values_mut() {
            remove(subs, &msg.processor);
        }
        for channel in &msg.channels {
            let subs = self.channels.entry(channel.clone()).or_default();
            if !subs.iter().any(|s| s.id() == msg.processor.id()) {
                subs.push(msg.processor.clone());
            }
        }
        self.reply_subscribed(&msg.processor);
    }

    fn unsubscribe(&mut self, msg: &Unsubscribe) {
        for channel in &msg.channels {
            if let Some(subs) = self.channels.get_mut(channel) {
                remove(subs, &msg.processor);
            }
        }
        self.reply_subscribed(&msg.processor);
    }

    fn unsubscribe_all(&mut self, msg: &UnsubscribeAll) {
        for subs in self.channels.values_mut() {
            remove(subs, &msg.processor);
        }
        self.reply_subscribed(&msg.processor);
    }

    /// Post the payload once to every distinct subscriber of any of the
    /// named channels. A full subscriber mailbox is reported back to the
    /// sender as `NotDelivered`, never retried.
    fn broadcast(&self, ctx: &mut Context, msg: &Broadcast) {
        let mut delivered: Vec<&str> = Vec::new();
        for channel in &msg.channels {
            if let Some(subs) = self.channels.get(channel) {
                for sub in subs {
                    if delivered.contains(&sub.id()) {
                        continue;
                    }
                    delivered.push(sub.id());
                    if !sub.post(Message::User(msg.msg.clone())) {
                        warn!(ctx.log(), "broadcast not delivered";
                            "subscriber" => sub.id(), "channel" => channel.as_str());
                        if let Some(sender) = &msg.sender {
                            let report = NotDelivered {
                                subscriber: sub.clone(),
                                broadcast: msg.clone(),
                            };
                            let _ = sender.post(Message::NotDelivered(report));
                        }
                    }
                }
            }
        }
    }
}

fn remove(subs: &mut Vec<ProcessorRef>, processor: &ProcessorRef) {
    if let Some(pos) = subs.iter().position(|s| s.id() == processor.id()) {
        subs.remove(pos);
    }
}

impl EventProcessor for Subscriptions {
    fn id(&self) -> &str {
        SUBSCRIPTIONS_ID
    }

    fn dispatcher(&self) -> &str {
        SUBSCRIPTIONS_DISPATCHER
    }

    fn on_event(&mut self, ctx: &mut Context, msg: &Message) -> Handled {
        match msg {
            Message::Subscriptions(cmd) => {
                match cmd {
                    SubscriptionsMsg::Subscribe(m) => self.subscribe(m),
                    SubscriptionsMsg::SetSubscription(m) => self.set_subscription(m),
                    SubscriptionsMsg::Unsubscribe(m) => self.unsubscribe(m),
                    SubscriptionsMsg::UnsubscribeAll(m) => self.unsubscribe_all(m),
                    SubscriptionsMsg::Broadcast(m) => self.broadcast(ctx, m),
                }
                Handled::Yes
            }
            _ => Handled::No,
        }
    }
}

#[derive(Clone, Debug)]
pub enum SubscriptionsMsg {
    /// Add the processor to each named channel
    Subscribe(Subscribe),

    /// Make the processor's membership exactly the named channels
    SetSubscription(SetSubscription),

    /// Remove the processor from the named channels
    Unsubscribe(Unsubscribe),

    /// Remove the processor from every channel
    UnsubscribeAll(UnsubscribeAll),

    /// Fan a payload out to the subscribers of the named channels
    Broadcast(Broadcast),
}

#[derive(Clone, Debug)]
pub struct Subscribe {
    pub processor: ProcessorRef,
    pub channels: Vec<Channel>,
}

#[derive(Clone, Debug)]
pub struct SetSubscription {
    pub processor: ProcessorRef,
    pub channels: Vec<Channel>,
}

#[derive(Clone, Debug)]
pub struct Unsubscribe {
    pub processor: ProcessorRef,
    pub channels: Vec<Channel>,
}

#[derive(Clone, Debug)]
pub struct UnsubscribeAll {
    pub processor: ProcessorRef,
}

#[derive(Clone, Debug)]
pub struct Broadcast {
    /// Receives `NotDelivered` reports; `None` drops them
    pub sender: Option<ProcessorRef>,
    pub channels: Vec<Channel>,
    pub msg: AnyMessage,
}

/// Reply sent to a processor after any change to its membership,
/// carrying the channels it now belongs to.
#[derive(Clone, Debug)]
pub struct Subscribed {
    pub channels: Vec<Channel>,
}

/// Sent to a broadcast's sender for each subscriber whose mailbox was
/// full.
#[derive(Clone, Debug)]
pub struct NotDelivered {
    pub subscriber: ProcessorRef,
    pub broadcast: Broadcast,
}

impl From<Subscribe> for SubscriptionsMsg {
    fn from(msg: Subscribe) -> Self {
        SubscriptionsMsg::Subscribe(msg)
    }
}

impl From<SetSubscription> for SubscriptionsMsg {
    fn from(msg: SetSubscription) -> Self {
        SubscriptionsMsg::SetSubscription(msg)
    }
}

impl From<Unsubscribe> for SubscriptionsMsg {
    fn from(msg: Unsubscribe) -> Self {
        SubscriptionsMsg::Unsubscribe(msg)
    }
}

impl From<UnsubscribeAll> for SubscriptionsMsg {
    fn from(msg: UnsubscribeAll) -> Self {
        SubscriptionsMsg::UnsubscribeAll(msg)
    }
}

impl From<Broadcast> for SubscriptionsMsg {
    fn from(msg: Broadcast) -> Self {
        SubscriptionsMsg::Broadcast(msg)
    }
}

impl From<SubscriptionsMsg> for Message {
    fn from(msg: SubscriptionsMsg) -> Self {
        Message::Subscriptions(msg)
    }
}

impl From<Subscribed> for Message {
    fn from(msg: Subscribed) -> Self {
        Message::Subscribed(msg)
    }
}

impl From<NotDelivered> for Message {
    fn from(msg: NotDelivered) -> Self {
        Message::NotDelivered(msg)
    }
}
