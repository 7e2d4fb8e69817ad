// ── Transport protocol selector ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Wire protocol a device uses to reach the hub.
///
/// The simulator never speaks these protocols itself; the selector is
/// handed to the [`Transport`](crate::Transport) unchanged.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Protocol {
    Mqtt,
    MqttWs,
    #[default]
    Amqp,
    AmqpWs,
    Http,
}
