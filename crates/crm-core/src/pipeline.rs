//! # Pipeline Board
//!
//! Groups deals into the six fixed stages, in board order, with a count and
//! value total per stage. Totals add raw `value` across currencies; the
//! board does no conversion.

use serde::Serialize;
use utoipa::ToSchema;

use crate::records::{Deal, DealStage};

/// One column of the board.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StageColumn {
    pub stage: DealStage,
    #[schema(value_type = String)]
    pub label: &'static str,
    pub count: usize,
    pub total_value: f64,
    pub deals: Vec<Deal>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PipelineBoard {
    pub stages: Vec<StageColumn>,
    pub totals: DealTotals,
}

impl PipelineBoard {
    /// Build the board from a deal list. Input order is preserved within
    /// each stage.
    pub fn from_deals(deals: impl IntoIterator<Item = Deal>) -> Self {
        let mut stages: Vec<StageColumn> = DealStage::ALL
            .iter()
            .map(|&stage| StageColumn {
                stage,
                label: stage.label(),
                count: 0,
                total_value: 0.0,
                deals: Vec::new(),
            })
            .collect();

        let mut totals = DealTotals::default();
        for deal in deals {
            totals.add(&deal);
            if let Some(column) = stages.iter_mut().find(|c| c.stage == deal.stage) {
                column.count += 1;
                column.total_value += deal.value;
                column.deals.push(deal);
            }
        }

        Self { stages, totals }
    }

    pub fn column(&self, stage: DealStage) -> Option<&StageColumn> {
        self.stages.iter().find(|c| c.stage == stage)
    }
}

/// Headline figures shown on the dashboard and the board.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct DealTotals {
    pub deal_count: usize,
    pub total_value: f64,
    pub won_value: f64,
    pub won_count: usize,
    pub open_count: usize,
}

impl DealTotals {
    pub fn from_deals<'a>(deals: impl IntoIterator<Item = &'a Deal>) -> Self {
        let mut totals = Self::default();
        for deal in deals {
            totals.add(deal);
        }
        totals
    }

    fn add(&mut self, deal: &Deal) {
        self.deal_count += 1;
        self.total_value += deal.value;
        match deal.stage {
            DealStage::ClosedWon => {
                self.won_count += 1;
                self.won_value += deal.value;
            }
            DealStage::ClosedLost => {}
            _ => self.open_count += 1,
        }
    }
}
