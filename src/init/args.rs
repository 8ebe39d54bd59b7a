// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};
use serde::Deserialize;

use crate::init::tail_receiver::TailReceiverArgs;

/// How emitted events are written
#[derive(Copy, Clone, Debug, Default, ValueEnum, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventOutput {
    /// One JSON object per line on stdout
    #[default]
    Stdout,
    /// Count events and drop them
    Discard,
}

#[derive(Debug, Args, Clone)]
pub struct TailRun {
    /// Where emitted events are written
    #[arg(
        value_enum,
        long,
        env = "ROTEL_TAIL_EVENT_OUTPUT",
        default_value = "stdout"
    )]
    pub event_output: EventOutput,

    #[command(flatten)]
    pub tail_receiver: TailReceiverArgs,
}
