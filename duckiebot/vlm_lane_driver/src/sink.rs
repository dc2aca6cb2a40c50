use dora_node_api::{arrow::array::BinaryArray, dora_core::config::DataId, DoraNode};
use eyre::Result;
use lane_pilot_lib::{DriveCommand, DriveCommandStamped};
use tracing::debug;

/// Where drive commands leave the node
pub trait CommandSink {
    fn publish(&mut self, command: &DriveCommand) -> Result<()>;
}

/// Publishes stamped commands as JSON on a dora output
pub struct DoraCommandSink {
    node: DoraNode,
    output: DataId,
    vehicle: String,
    published: u64,
}

impl DoraCommandSink {
    pub fn new(node: DoraNode, output: DataId, vehicle: &str) -> Self {
        Self {
            node,
            output,
            vehicle: vehicle.to_string(),
            published: 0,
        }
    }

    pub fn published(&self) -> u64 {
        self.published
    }
}

impl CommandSink for DoraCommandSink {
    fn publish(&mut self, command: &DriveCommand) -> Result<()> {
        let stamped = DriveCommandStamped::new(*command, &self.vehicle);
        let serialized = serde_json::to_vec(&stamped)?;
        let arrow_data = BinaryArray::from_vec(vec![serialized.as_slice()]);
        self.node
            .send_output(self.output.clone(), Default::default(), arrow_data)?;

        self.published += 1;
        debug!(
            "Published {}: v={:.3} m/s, omega={:.3} rad/s",
            self.output.as_str(),
            command.v,
            command.omega
        );
        Ok(())
    }
}

/// Keeps every published command, for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub commands: Vec<DriveCommand>,
}

#[cfg(test)]
impl CommandSink for RecordingSink {
    fn publish(&mut self, command: &DriveCommand) -> Result<()> {
        self.commands.push(*command);
        Ok(())
    }
}
