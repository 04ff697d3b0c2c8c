//! Property tests for order preservation across the plot queues
//!
//! Any sequence of updates pushed through a running manager must leave the
//! surface exactly as applying the same sequence directly would.

mod common;

use common::builders::headless_config;
use devtk_rs::plot::command::coalesce;
use devtk_rs::plot::{
    ArtistId, ArtistSpec, DataPayload, DataUpdate, FigureSpec, Placement, PlotManager, PlotSurface,
};
use proptest::prelude::*;

const LINE_SIZE: usize = 4;
const ARTISTS: usize = 3;

#[derive(Debug, Clone)]
enum Op {
    Replace(usize, Vec<f64>),
    Append(usize, Vec<f64>),
    /// Wrong cardinality; must be rejected without side effects
    Bad(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let value = -1_000.0f64..1_000.0;
    prop_oneof![
        (0..ARTISTS, prop::collection::vec(value.clone(), LINE_SIZE))
            .prop_map(|(a, v)| Op::Replace(a, v)),
        (0..ARTISTS, prop::collection::vec(value, 1..=LINE_SIZE + 2))
            .prop_map(|(a, v)| Op::Append(a, v)),
        (0..ARTISTS).prop_map(Op::Bad),
    ]
}

fn payload(op: &Op) -> (usize, DataPayload) {
    match op {
        Op::Replace(a, v) => (*a, DataPayload::Line(v.clone())),
        Op::Append(a, v) => (*a, DataPayload::LineAppend(v.clone())),
        Op::Bad(a) => (*a, DataPayload::Line(vec![0.0; LINE_SIZE + 1])),
    }
}

/// Surface with one axis and `ARTISTS` lines, built directly
fn direct_surface() -> (PlotSurface, Vec<ArtistId>) {
    let mut surface = PlotSurface::new();
    let figure = surface.create_figure_from(FigureSpec::grid(1, 1)).unwrap();
    let axis = surface.create_axis(figure, Placement::cell(0, 0)).unwrap();
    let artists = (0..ARTISTS)
        .map(|_| surface.create_artist(axis, ArtistSpec::line(LINE_SIZE)).unwrap())
        .collect();
    (surface, artists)
}

fn line_data(surface: &PlotSurface, artist: ArtistId) -> Vec<f64> {
    match &surface.artist(artist).unwrap().data {
        devtk_rs::plot::ArtistData::Line(values) => values.clone(),
        other => panic!("expected line data, got {:?}", other),
    }
}

/// NaN-aware comparison of line windows
fn same_window(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| (x.is_nan() && y.is_nan()) || x == y)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_manager_matches_direct_application(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let (mut direct, direct_ids) = direct_surface();
        let mut direct_errors = 0;
        for op in &ops {
            let (index, payload) = payload(op);
            if direct.update(direct_ids[index], payload).is_err() {
                direct_errors += 1;
            }
        }

        let mut plots = PlotManager::new(headless_config());
        let figure = plots.create_figure_from(FigureSpec::grid(1, 1)).unwrap();
        let axis = plots.create_axis(figure, Placement::cell(0, 0)).unwrap();
        let ids: Vec<ArtistId> = (0..ARTISTS)
            .map(|_| plots.create_line_plot(axis, LINE_SIZE).unwrap())
            .collect();
        plots.show().unwrap();
        for op in &ops {
            let (index, payload) = payload(op);
            plots.add_data(ids[index], payload).unwrap();
        }
        plots.stop().unwrap();

        prop_assert_eq!(plots.take_errors().len(), direct_errors);
        let surface = plots.snapshot().unwrap();
        for (managed, reference) in ids.iter().zip(&direct_ids) {
            let got = line_data(surface, *managed);
            let want = line_data(&direct, *reference);
            prop_assert!(same_window(&got, &want), "got {:?}, want {:?}", got, want);
        }
    }

    #[test]
    fn prop_coalescing_preserves_final_state(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let valid: Vec<Op> = ops.into_iter().filter(|op| !matches!(op, Op::Bad(_))).collect();

        let (mut sequential, ids) = direct_surface();
        let mut updates = Vec::with_capacity(valid.len());
        for op in &valid {
            let (index, payload) = payload(op);
            sequential.update(ids[index], payload.clone()).unwrap();
            updates.push(DataUpdate::new(ids[index], payload));
        }

        let (mut coalesced, coalesced_ids) = direct_surface();
        prop_assert_eq!(&ids, &coalesced_ids);
        let merged = coalesce(updates.clone());
        prop_assert!(merged.len() <= updates.len());
        for update in merged {
            coalesced.apply_update(update).unwrap();
        }

        for id in &ids {
            let got = line_data(&coalesced, *id);
            let want = line_data(&sequential, *id);
            prop_assert!(same_window(&got, &want), "got {:?}, want {:?}", got, want);
        }
    }
}
