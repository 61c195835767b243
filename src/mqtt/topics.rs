use super::TopicKind;
use crate::config::{ButtonSlot, MAX_SLOTS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotTopics {
    pub state: String,
    pub click: String,
    pub hold: String,
    pub click_click: String,
    pub click_hold: String,
}

impl SlotTopics {
    fn new(prefix: &str, name: &str) -> Self {
        let topic = |kind: TopicKind| format!("{}/{}/{}", prefix, name, kind.suffix());
        Self {
            state: topic(TopicKind::State),
            click: topic(TopicKind::Click),
            hold: topic(TopicKind::Hold),
            click_click: topic(TopicKind::ClickClick),
            click_hold: topic(TopicKind::ClickHold),
        }
    }

    pub fn get(&self, kind: TopicKind) -> &str {
        match kind {
            TopicKind::State => &self.state,
            TopicKind::Click => &self.click,
            TopicKind::Hold => &self.hold,
            TopicKind::ClickClick => &self.click_click,
            TopicKind::ClickHold => &self.click_hold,
        }
    }
}

/// Every topic the gateway publishes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTopics {
    availability: String,
    slots: [Option<SlotTopics>; MAX_SLOTS],
}

impl PublishTopics {
    pub fn new(prefix: &str, buttons: &[Option<ButtonSlot>; MAX_SLOTS]) -> Self {
        let slots = std::array::from_fn(|i| {
            buttons[i]
                .as_ref()
                .map(|button| SlotTopics::new(prefix, &button.name))
        });
        Self {
            availability: format!("{}/LWT", prefix),
            slots,
        }
    }

    pub fn availability(&self) -> &str {
        &self.availability
    }

    /// `None` for slots without a configured button
    pub fn topic(&self, slot: u8, kind: TopicKind) -> Option<&str> {
        self.slots
            .get(usize::from(slot))?
            .as_ref()
            .map(|topics| topics.get(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buttons() -> [Option<ButtonSlot>; MAX_SLOTS] {
        let mut table: [Option<ButtonSlot>; MAX_SLOTS] = Default::default();
        table[2] = Some(ButtonSlot {
            slot: 2,
            name: "desk".to_string(),
            address: None,
        });
        table
    }

    #[test]
    fn test_topic_layout() {
        let topics = PublishTopics::new("home/flic", &buttons());
        assert_eq!(topics.availability(), "home/flic/LWT");
        assert_eq!(topics.topic(2, TopicKind::State), Some("home/flic/desk/STATE"));
        assert_eq!(
            topics.topic(2, TopicKind::ClickHold),
            Some("home/flic/desk/CLICKHOLD")
        );
        assert_eq!(
            topics.topic(2, TopicKind::ClickClick),
            Some("home/flic/desk/CLICKCLICK")
        );
    }

    #[test]
    fn test_unconfigured_slots_have_no_topics() {
        let topics = PublishTopics::new("flic", &buttons());
        assert_eq!(topics.topic(0, TopicKind::Click), None);
        assert_eq!(topics.topic(200, TopicKind::Click), None);
    }
}
