//! Messages sent from the producing side to the rendering thread.

use crate::plot::artist::{ArtistSpec, DataPayload};
use crate::plot::id::{ArtistId, AxisId, FigureId};
use crate::plot::layout::{AxisOptions, FigureSpec, Placement};
use std::collections::HashMap;

/// A structural change to the plot surface.
///
/// Identifiers are allocated before the command is queued, so the sender
/// can refer to the new object immediately.
#[derive(Debug, Clone, PartialEq)]
pub enum PlotCommand {
    CreateFigure {
        id: FigureId,
        spec: FigureSpec,
    },
    CreateAxis {
        id: AxisId,
        figure: FigureId,
        placement: Placement,
    },
    ModifyAxis {
        axis: AxisId,
        options: AxisOptions,
    },
    CreateArtist {
        id: ArtistId,
        axis: AxisId,
        spec: ArtistSpec,
    },
    /// Put every figure on screen
    Show,
    /// Hide every figure; the rendering loop keeps running
    Close,
}

impl PlotCommand {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            PlotCommand::CreateFigure { .. } => "create_figure",
            PlotCommand::CreateAxis { .. } => "create_axis",
            PlotCommand::ModifyAxis { .. } => "modify_axis",
            PlotCommand::CreateArtist { .. } => "create_artist",
            PlotCommand::Show => "show",
            PlotCommand::Close => "close",
        }
    }
}

/// New values for one artist
#[derive(Debug, Clone, PartialEq)]
pub struct DataUpdate {
    pub artist: ArtistId,
    pub payload: DataPayload,
}

impl DataUpdate {
    pub fn new(artist: ArtistId, payload: DataPayload) -> Self {
        Self { artist, payload }
    }
}

/// Drop updates that a later update to the same artist fully overwrites.
///
/// For each artist only the updates from its last full replacement onward
/// are kept. Appends after that point survive in their original order, and
/// the relative order of the kept updates is unchanged.
pub fn coalesce(updates: Vec<DataUpdate>) -> Vec<DataUpdate> {
    let mut last_replace: HashMap<ArtistId, usize> = HashMap::new();
    for (index, update) in updates.iter().enumerate() {
        if update.payload.replaces_all() {
            last_replace.insert(update.artist, index);
        }
    }

    if last_replace.is_empty() {
        return updates;
    }

    updates
        .into_iter()
        .enumerate()
        .filter(|(index, update)| {
            last_replace
                .get(&update.artist)
                .map_or(true, |&keep_from| *index >= keep_from)
        })
        .map(|(_, update)| update)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: u32, v: f64) -> DataUpdate {
        DataUpdate::new(ArtistId(id), DataPayload::Line(vec![v]))
    }

    fn append(id: u32, v: f64) -> DataUpdate {
        DataUpdate::new(ArtistId(id), DataPayload::LineAppend(vec![v]))
    }

    #[test]
    fn test_coalesce_keeps_latest_replacement() {
        let out = coalesce(vec![line(1, 1.0), line(2, 1.0), line(1, 2.0), line(1, 3.0)]);
        assert_eq!(out, vec![line(2, 1.0), line(1, 3.0)]);
    }

    #[test]
    fn test_coalesce_keeps_appends_after_replacement() {
        let out = coalesce(vec![
            append(1, 0.0),
            line(1, 1.0),
            append(1, 2.0),
            append(2, 9.0),
            append(1, 3.0),
        ]);
        assert_eq!(
            out,
            vec![line(1, 1.0), append(1, 2.0), append(2, 9.0), append(1, 3.0)]
        );
    }

    #[test]
    fn test_coalesce_appends_only_untouched() {
        let input = vec![append(1, 1.0), append(1, 2.0)];
        assert_eq!(coalesce(input.clone()), input);
    }
}
