//! Thread boundary between the producing side and the rendering thread.
//!
//! Two unbounded FIFO queues: one for structural [`PlotCommand`]s, one for
//! [`DataUpdate`]s. Sending never blocks. The rendering thread owns the
//! [`PlotReceiver`]; any number of cloned [`PlotSender`]s feed it.

use crate::error::{DevtkError, Result};
use crate::plot::command::{DataUpdate, PlotCommand};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

/// Create a connected sender/receiver pair
pub fn plot_channel() -> (PlotSender, PlotReceiver) {
    let (cmd_tx, cmd_rx) = unbounded();
    let (data_tx, data_rx) = unbounded();
    (
        PlotSender { cmd_tx, data_tx },
        PlotReceiver { cmd_rx, data_rx },
    )
}

/// Producing side of the plot queues
#[derive(Debug, Clone)]
pub struct PlotSender {
    cmd_tx: Sender<PlotCommand>,
    data_tx: Sender<DataUpdate>,
}

impl PlotSender {
    pub fn send_command(&self, cmd: PlotCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|e| DevtkError::Channel(format!("Rendering loop has exited, dropped {}", e.0.name())))
    }

    pub fn send_data(&self, update: DataUpdate) -> Result<()> {
        self.data_tx.send(update).map_err(|e| {
            DevtkError::Channel(format!(
                "Rendering loop has exited, dropped update for {}",
                e.0.artist
            ))
        })
    }

    /// Queue several updates, stopping at the first failure
    pub fn send_data_batch(&self, updates: impl IntoIterator<Item = DataUpdate>) -> Result<()> {
        updates.into_iter().try_for_each(|u| self.send_data(u))
    }

    /// Number of queued (commands, data updates)
    pub fn pending(&self) -> (usize, usize) {
        (self.cmd_tx.len(), self.data_tx.len())
    }
}

/// Rendering side of the plot queues
#[derive(Debug)]
pub struct PlotReceiver {
    cmd_rx: Receiver<PlotCommand>,
    data_rx: Receiver<DataUpdate>,
}

/// Result of draining the command queue
#[derive(Debug, Default)]
pub struct CommandDrain {
    pub commands: Vec<PlotCommand>,
    /// Every sender is gone; nothing more will arrive
    pub disconnected: bool,
}

impl PlotReceiver {
    /// Take the data updates queued right now.
    ///
    /// Updates that arrive while the snapshot is processed are left for the
    /// next tick. Taking this snapshot before draining commands means every
    /// command queued ahead of a snapshotted update is applied before it.
    pub fn snapshot_data(&self) -> Vec<DataUpdate> {
        let queued = self.data_rx.len();
        let mut updates = Vec::with_capacity(queued);
        for _ in 0..queued {
            match self.data_rx.try_recv() {
                Ok(update) => updates.push(update),
                Err(_) => break,
            }
        }
        updates
    }

    /// Take every queued command
    pub fn drain_commands(&self) -> CommandDrain {
        let mut drain = CommandDrain::default();
        loop {
            match self.cmd_rx.try_recv() {
                Ok(cmd) => drain.commands.push(cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    drain.disconnected = true;
                    break;
                }
            }
        }
        drain
    }

    pub fn is_empty(&self) -> bool {
        self.cmd_rx.is_empty() && self.data_rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plot::artist::DataPayload;
    use crate::plot::id::ArtistId;

    #[test]
    fn test_snapshot_leaves_later_updates() {
        let (tx, rx) = plot_channel();
        tx.send_data(DataUpdate::new(ArtistId(1), DataPayload::Bar(vec![1.0])))
            .unwrap();
        let snapshot = rx.snapshot_data();
        tx.send_data(DataUpdate::new(ArtistId(1), DataPayload::Bar(vec![2.0])))
            .unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(rx.snapshot_data().len(), 1);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_drain_reports_disconnect() {
        let (tx, rx) = plot_channel();
        tx.send_command(PlotCommand::Show).unwrap();
        drop(tx);

        let drain = rx.drain_commands();
        assert_eq!(drain.commands, vec![PlotCommand::Show]);
        assert!(drain.disconnected);
    }

    #[test]
    fn test_send_after_receiver_dropped_fails() {
        let (tx, rx) = plot_channel();
        drop(rx);
        let err = tx.send_command(PlotCommand::Close).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Channel);
        assert!(tx
            .send_data(DataUpdate::new(ArtistId(3), DataPayload::Line(vec![])))
            .is_err());
    }
}
