//! Topic names derived from the device and thing identifiers.

use core::fmt::Write;

use heapless::String;

use crate::error::CloudError;

/// Maximum length for a single topic string.
pub const MAX_TOPIC_LEN: usize = 128;

pub type Topic = String<MAX_TOPIC_LEN>;

/// Inbound/outbound pair of one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicPair {
    /// Cloud → device.
    pub inbound: Topic,
    /// Device → cloud.
    pub outbound: Topic,
}

impl TopicPair {
    fn build(scope: &str, id: &str, channel: &str) -> Result<Self, CloudError> {
        Ok(Self {
            inbound: format_topic(scope, id, channel, 'i')?,
            outbound: format_topic(scope, id, channel, 'o')?,
        })
    }
}

/// Device configuration channel, fixed for the device's lifetime.
pub fn device_topics(device_id: &str) -> Result<TopicPair, CloudError> {
    TopicPair::build("d", device_id, "e")
}

/// Topics of the thing a device is attached to.
///
/// Empty until the first thing id is resolved; recomputed whenever the thing
/// id changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThingTopics {
    /// Property updates.
    pub data: TopicPair,
    /// Last-values request and reply.
    pub shadow: TopicPair,
}

impl ThingTopics {
    pub fn resolve(thing_id: &str) -> Result<Self, CloudError> {
        Ok(Self {
            data: TopicPair::build("t", thing_id, "e")?,
            shadow: TopicPair::build("t", thing_id, "shadow")?,
        })
    }

    /// Topics the device subscribes to while attached.
    pub fn inbound(&self) -> [&str; 2] {
        [self.data.inbound.as_str(), self.shadow.inbound.as_str()]
    }
}

fn format_topic(scope: &str, id: &str, channel: &str, direction: char) -> Result<Topic, CloudError> {
    let mut topic = Topic::new();
    write!(topic, "/a/{}/{}/{}/{}", scope, id, channel, direction)
        .map_err(|_| CloudError::TopicTooLong)?;
    Ok(topic)
}
