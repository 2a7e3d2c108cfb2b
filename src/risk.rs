// =============================================================================
// Risk Evaluator — pre-trade approval and position sizing
// =============================================================================
//
// Gates run in a fixed order; the first failure wins and its reason is
// recorded verbatim in the signals table:
//
//   1. trading permitted (broker flag + emergency stop)
//   2. daily loss cap
//   3. concurrent position caps (total, per symbol)
//   4. liquidity-trap veto (spread / volume / gap)
//   5. account phase scaling (balance tiers + recovery, daily trade cap)
//   6. drawdown tier multiplier
//   7. balance-tiered max SL fraction
//   8. position sizing (risk target -> lot, snapped and clamped)
//   9. free margin
//
// A rejection is data, not an error: it is logged at debug and counted.
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bridge::SymbolInfo;
use crate::config::RiskConfig;
use crate::context::{pip_size, MarketContext};
use crate::types::{Account, AccountPhase, Bar, DrawdownTier, Position, Signal};

/// Leverage assumed for the margin estimate when the bridge does not supply
/// one.
const ASSUMED_LEVERAGE: f64 = 100.0;

/// Fraction of free margin a new position may consume.
const FREE_MARGIN_HEADROOM: f64 = 0.9;

// =============================================================================
// RiskState — daily counters and drawdown tracking
// =============================================================================

/// Mutable risk counters, reset at the UTC day boundary. Persisted in the
/// state snapshot so restarts keep the daily budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub daily_realized_pnl: f64,
    pub daily_trade_count: u32,
    /// Monotonically non-decreasing within a session.
    pub peak_equity: f64,
    pub current_drawdown_pct: f64,
    pub last_reset_date: NaiveDate,
}

impl RiskState {
    pub fn new(equity: f64, now: DateTime<Utc>) -> Self {
        Self {
            daily_realized_pnl: 0.0,
            daily_trade_count: 0,
            peak_equity: equity.max(0.0),
            current_drawdown_pct: 0.0,
            last_reset_date: now.date_naive(),
        }
    }

    /// Roll the daily counters when the UTC date has changed.
    pub fn maybe_reset_daily(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.last_reset_date != today {
            info!(
                old_date = %self.last_reset_date,
                new_date = %today,
                "UTC date rolled — resetting daily risk counters"
            );
            self.daily_realized_pnl = 0.0;
            self.daily_trade_count = 0;
            self.last_reset_date = today;
        }
    }

    /// Track equity against the session peak and refresh drawdown.
    pub fn update_equity(&mut self, equity: f64) {
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        self.current_drawdown_pct = if self.peak_equity > 0.0 {
            ((self.peak_equity - equity) / self.peak_equity * 100.0).max(0.0)
        } else {
            0.0
        };
    }

    /// Record a realized trade result.
    pub fn record_trade(&mut self, pnl: f64) {
        self.daily_realized_pnl += pnl;
        self.daily_trade_count += 1;
        debug!(
            pnl,
            daily_pnl = self.daily_realized_pnl,
            daily_trades = self.daily_trade_count,
            "trade result recorded"
        );
    }

    pub fn drawdown_tier(&self) -> DrawdownTier {
        DrawdownTier::from_drawdown_pct(self.current_drawdown_pct)
    }
}

// =============================================================================
// Verdict
// =============================================================================

/// Outcome of a pre-trade evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct RiskVerdict {
    pub approved: bool,
    /// Stable snake_case reason; "approved" on success.
    pub reason: String,
    pub lot: f64,
    pub sl: f64,
    pub tp: f64,
    pub phase: AccountPhase,
    pub drawdown_tier: DrawdownTier,
}

impl RiskVerdict {
    fn rejected(reason: &str, phase: AccountPhase, tier: DrawdownTier) -> Self {
        Self {
            approved: false,
            reason: reason.to_string(),
            lot: 0.0,
            sl: 0.0,
            tp: 0.0,
            phase,
            drawdown_tier: tier,
        }
    }
}

/// Everything the evaluator needs for one decision.
pub struct RiskInputs<'a> {
    pub signal: &'a Signal,
    pub account: &'a Account,
    pub state: &'a RiskState,
    pub open_positions: &'a [Position],
    pub market: &'a MarketContext,
    pub symbol_info: &'a SymbolInfo,
    pub bars: &'a [Bar],
}

// =============================================================================
// Evaluator
// =============================================================================

pub struct RiskEvaluator {
    cfg: RiskConfig,
}

impl RiskEvaluator {
    pub fn new(cfg: RiskConfig) -> Self {
        Self { cfg }
    }

    /// Run the full gate sequence for `inputs.signal`.
    pub fn evaluate(&self, inputs: &RiskInputs<'_>) -> RiskVerdict {
        let account = inputs.account;
        let state = inputs.state;
        let phase = AccountPhase::derive(
            account.balance,
            state.current_drawdown_pct,
            self.cfg.recovery_drawdown_pct,
        );
        let tier = state.drawdown_tier();

        // ── 1. Trading permitted ────────────────────────────────────────
        if !account.trade_allowed {
            return RiskVerdict::rejected("trading_not_allowed", phase, tier);
        }
        if state.current_drawdown_pct >= self.cfg.emergency_stop_loss_pct {
            return RiskVerdict::rejected("emergency_stop", phase, tier);
        }

        // ── 2. Daily loss cap ───────────────────────────────────────────
        if state.daily_realized_pnl <= -self.cfg.max_daily_loss {
            return RiskVerdict::rejected("daily_loss_cap", phase, tier);
        }

        // ── 3. Concurrent position caps ─────────────────────────────────
        if inputs.open_positions.len() as u32 >= self.cfg.max_total_positions {
            return RiskVerdict::rejected("max_total_positions", phase, tier);
        }
        let symbol_count = inputs
            .open_positions
            .iter()
            .filter(|p| p.symbol == inputs.signal.symbol)
            .count() as u32;
        if symbol_count >= self.cfg.max_positions_per_symbol {
            return RiskVerdict::rejected("max_positions_per_symbol", phase, tier);
        }

        // ── 4. Liquidity-trap veto ──────────────────────────────────────
        if inputs.market.spread_pips > self.cfg.max_spread_threshold_pips {
            return RiskVerdict::rejected("liquidity_trap_spread", phase, tier);
        }
        if let Some(last) = inputs.bars.last() {
            if last.volume < self.cfg.min_volume_threshold {
                return RiskVerdict::rejected("liquidity_trap_volume", phase, tier);
            }
        }
        if inputs.bars.len() >= 2 {
            let prev_close = inputs.bars[inputs.bars.len() - 2].close;
            let open = inputs.bars[inputs.bars.len() - 1].open;
            let gap_pips = (open - prev_close).abs() / pip_size(inputs.symbol_info).max(f64::MIN_POSITIVE);
            if gap_pips > self.cfg.max_gap_threshold_pips {
                return RiskVerdict::rejected("liquidity_trap_gap", phase, tier);
            }
        }

        // ── 5. Account phase scaling ────────────────────────────────────
        let trades_cap = self.trades_per_day(phase);
        if state.daily_trade_count >= trades_cap {
            return RiskVerdict::rejected("daily_trade_cap", phase, tier);
        }

        // ── 6. Drawdown tier multiplier ─────────────────────────────────
        let dd_mult = self.drawdown_multiplier(tier);
        if dd_mult <= 0.0 {
            return RiskVerdict::rejected("drawdown_emergency", phase, tier);
        }

        // ── 7+8. Stops and sizing ───────────────────────────────────────
        let entry = match inputs.bars.last() {
            Some(bar) => bar.close,
            None => return RiskVerdict::rejected("no_market_data", phase, tier),
        };
        let sign = inputs.signal.side.sign();
        let atr = inputs.market.atr;

        let sl = inputs
            .signal
            .suggested_sl
            .unwrap_or(entry - sign * self.cfg.sl_atr_multiplier * atr);
        let tp = inputs
            .signal
            .suggested_tp
            .unwrap_or(entry + sign * self.cfg.tp_atr_multiplier * atr);

        let sl_distance = (entry - sl).abs();
        if sl_distance <= 0.0 || !sl_distance.is_finite() {
            return RiskVerdict::rejected("invalid_stop_distance", phase, tier);
        }

        // Loss in account currency for one full lot at the SL.
        let loss_per_lot = sl_distance * inputs.symbol_info.contract_size;
        if loss_per_lot <= 0.0 {
            return RiskVerdict::rejected("invalid_stop_distance", phase, tier);
        }

        // Balance-tiered cap on the SL value.
        let sl_value_cap = self.sl_fraction(account.balance) * account.balance;

        let risk_pct = self.cfg.base_risk_pct.min(phase.max_risk_pct());
        let target_risk = (account.balance * risk_pct * dd_mult).min(sl_value_cap);
        if target_risk <= 0.0 {
            return RiskVerdict::rejected("sl_exceeds_balance_tier", phase, tier);
        }

        let mut lot = target_risk / loss_per_lot;
        if let Some(suggested) = inputs.signal.suggested_lot {
            lot = lot.min(suggested);
        }
        lot = lot.min(self.cfg.max_position_size);
        let lot = inputs.symbol_info.snap_lot(lot);
        if lot <= 0.0 {
            return RiskVerdict::rejected("lot_below_minimum", phase, tier);
        }

        // The snapped lot must still respect the balance-tier SL cap.
        if lot * loss_per_lot > sl_value_cap + 1e-9 {
            return RiskVerdict::rejected("sl_exceeds_balance_tier", phase, tier);
        }

        // ── 9. Free margin ──────────────────────────────────────────────
        let required_margin = lot * inputs.symbol_info.contract_size * entry / ASSUMED_LEVERAGE;
        if required_margin > account.free_margin * FREE_MARGIN_HEADROOM {
            return RiskVerdict::rejected("insufficient_margin", phase, tier);
        }

        debug!(
            symbol = %inputs.signal.symbol,
            side = %inputs.signal.side,
            lot,
            sl,
            tp,
            phase = %phase,
            tier = %tier,
            "signal approved"
        );

        RiskVerdict {
            approved: true,
            reason: "approved".to_string(),
            lot,
            sl,
            tp,
            phase,
            drawdown_tier: tier,
        }
    }

    /// Daily trade cap for a phase, honoring the config override when set.
    fn trades_per_day(&self, phase: AccountPhase) -> u32 {
        let index = match phase {
            AccountPhase::Micro => 0,
            AccountPhase::Seed => 1,
            AccountPhase::Growth => 2,
            AccountPhase::Established => 3,
            AccountPhase::Mature => 4,
            AccountPhase::Recovery => 5,
        };
        self.cfg
            .adaptive_trades_per_day
            .get(index)
            .copied()
            .unwrap_or_else(|| phase.max_trades_per_day())
    }

    /// Risk multiplier for a drawdown tier from the config table.
    fn drawdown_multiplier(&self, tier: DrawdownTier) -> f64 {
        let index = match tier {
            DrawdownTier::Normal => 0,
            DrawdownTier::Warning => 1,
            DrawdownTier::Severe => 2,
            DrawdownTier::Critical => 3,
            DrawdownTier::Emergency => 4,
        };
        self.cfg
            .adaptive_drawdown_multipliers
            .get(index)
            .copied()
            .unwrap_or_else(|| tier.risk_multiplier())
    }

    /// Max SL value as a fraction of balance for the balance tier.
    fn sl_fraction(&self, balance: f64) -> f64 {
        let mut index = 0;
        for threshold in &self.cfg.sl_balance_thresholds {
            if balance <= *threshold {
                break;
            }
            index += 1;
        }
        self.cfg
            .sl_balance_fractions
            .get(index)
            .copied()
            .unwrap_or(0.05)
    }
}
