// =============================================================================
// Evaluation loop (component K)
// =============================================================================
//
// One pass over the watchlist per tick: resolve tokens, refresh live-game
// context, update prices, run the admission gate chain, and drive
// watching → pending_signal → signaled → traded transitions. Grounded on
// the teacher's `strategy.rs::StrategyEngine::evaluate_symbol` — a single
// evaluate-one-unit function orchestrating indicators → gates → a decision
// record — generalized here to one cycle over an entire watchlist with
// explicit state transitions instead of a single always-flat evaluation.
//
// Price-driven exits for already-traded positions are handled separately
// by `exits.rs`, run by the caller after this cycle completes.
// =============================================================================

use std::collections::HashSet;

use chrono::NaiveDate;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::clock::signal_id;
use crate::config::{LeagueTable, RuntimeConfig, StageThresholds};
use crate::decision_envelope::DecisionEnvelope;
use crate::exchange::ExchangeClient;
use crate::execution::ExecutionBridge;
use crate::filters::{self, GateOutcome};
use crate::http_queue::HttpQueue;
use crate::journal::{Journal, PriceTick, SignalEvent};
use crate::metrics::{Metrics, SignalSnapshot};
use crate::orderbook::{BookClient, ParsedBook};
use crate::scoreboard::nba::NbaScoreboard;
use crate::scoreboard::ncaa::NcaaScoreboard;
use crate::scoreboard::soccer::SoccerScoreboard;
use crate::streaming::StreamingClient;
use crate::token_resolver::TokenResolver;
use crate::types::{MarketStatus, Quote, QuoteSource};
use crate::watchlist::{ContextEntrySnapshot, ContextSnapshot, MarketRecord, PriceSnapshot, RejectInfo, Watchlist};

/// Tallies of what happened this cycle, for logging and tests.
#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    pub tokens_resolved: usize,
    pub price_updates: usize,
    pub context_tagged: usize,
    pub purged: usize,
    pub pending_opened: usize,
    pub pending_timed_out: usize,
    pub signaled: usize,
    /// Gate-audit envelopes created this cycle, for the caller to hand to
    /// `AppState::push_decision`.
    pub decisions: Vec<DecisionEnvelope>,
}

/// Which side of a YES/NO pair won YES when computing margin/score for a
/// context-gated league.
fn yes_outcome_name(record: &MarketRecord) -> Option<String> {
    let yes = record.yes_token_id.as_ref()?;
    let idx = record.token_pair.iter().position(|t| t == yes)?;
    record.outcomes.get(idx).cloned()
}

fn margin_for_yes(context: &ContextSnapshot, yes_team: &str) -> Option<f64> {
    let (yes_score, no_score) = if context.team_a.eq_ignore_ascii_case(yes_team) {
        (context.team_a_score?, context.team_b_score?)
    } else {
        (context.team_b_score?, context.team_a_score?)
    };
    Some((yes_score - no_score) as f64)
}

/// Complement-priced best-bid/best-ask from cached WS quotes on both sides
/// of a binary pair, per SPEC_FULL.md §4.K: `ask = min(yes.ask, 1-no.bid)`,
/// `bid = max(yes.bid, 1-no.ask)`. Either side missing falls back to
/// whichever quote is available; both missing yields `None`.
fn complement_price(yes: Option<crate::streaming::CachedQuote>, no: Option<crate::streaming::CachedQuote>) -> Quote {
    let yes_ask = yes.and_then(|q| q.best_ask);
    let yes_bid = yes.and_then(|q| q.best_bid);
    let no_ask = no.and_then(|q| q.best_ask);
    let no_bid = no.and_then(|q| q.best_bid);

    let best_ask = match (yes_ask, no_bid) {
        (Some(a), Some(b)) => Some(a.min(1.0 - b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(1.0 - b),
        (None, None) => None,
    };
    let best_bid = match (yes_bid, no_ask) {
        (Some(a), Some(b)) => Some(a.max(1.0 - b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(1.0 - b),
        (None, None) => None,
    };
    Quote { best_bid, best_ask }
}

pub struct EvalLoop {
    token_resolver: TokenResolver,
    book_client: BookClient,
    nba: AsyncMutex<NbaScoreboard>,
    ncaa: AsyncMutex<NcaaScoreboard>,
    soccer: AsyncMutex<SoccerScoreboard>,
}

impl EvalLoop {
    pub fn new(
        book_base_url: impl Into<String>,
        nba_base_url: impl Into<String>,
        ncaa_base_url: impl Into<String>,
        soccer_base_url: impl Into<String>,
        scoreboard_cache_ttl_seconds: i64,
    ) -> Self {
        let book_base_url = book_base_url.into();
        Self {
            token_resolver: TokenResolver::new(book_base_url.clone()),
            book_client: BookClient::new(book_base_url),
            nba: AsyncMutex::new(NbaScoreboard::new(nba_base_url, scoreboard_cache_ttl_seconds)),
            ncaa: AsyncMutex::new(NcaaScoreboard::new(ncaa_base_url, scoreboard_cache_ttl_seconds)),
            soccer: AsyncMutex::new(SoccerScoreboard::new(soccer_base_url, scoreboard_cache_ttl_seconds)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn run_cycle(
        &self,
        watchlist: &Watchlist,
        streaming: &StreamingClient,
        http_queue: &HttpQueue,
        metrics: &mut Metrics,
        execution: &ExecutionBridge,
        exchange: &dyn ExchangeClient,
        journal: &Journal,
        runtime: &RuntimeConfig,
        leagues: &LeagueTable,
        now: i64,
        today: NaiveDate,
        date_key: &str,
    ) -> CycleSummary {
        let mut summary = CycleSummary::default();
        metrics.bump(now, "eval_cycle");

        // Step 2: token resolution, skipped while any signal is pending so
        // the pending window's deadline is never starved of HTTP budget.
        let any_pending = watchlist.all().iter().any(|r| r.status == MarketStatus::PendingSignal);
        if !any_pending {
            let per_league_quota = (runtime.max_token_resolves_per_cycle / 2).max(1);
            summary.tokens_resolved = self
                .token_resolver
                .run_cycle(
                    watchlist,
                    http_queue,
                    runtime.max_levels_considered,
                    runtime.max_token_resolves_per_cycle,
                    per_league_quota,
                    metrics,
                    now,
                )
                .await;
        }

        // Step 3: refresh scoreboard feeds and tag context on every market
        // with a mapped league still in the pipeline universe.
        {
            let mut nba = self.nba.lock().await;
            if let Err(e) = nba.fetch(today, now).await {
                warn!(error = %e, "nba scoreboard fetch failed");
            }
            let mut ncaa = self.ncaa.lock().await;
            if let Err(e) = ncaa.fetch(today, now).await {
                warn!(error = %e, "ncaa scoreboard fetch failed");
            }
            let mut soccer = self.soccer.lock().await;
            if let Err(e) = soccer.fetch(today, now).await {
                warn!(error = %e, "soccer scoreboard fetch failed");
            }

            for record in watchlist.all() {
                if !matches!(record.status, MarketStatus::Watching | MarketStatus::PendingSignal) {
                    continue;
                }
                let league_config = leagues.leagues.get(&record.league);
                let Some(league_config) = league_config else { continue };

                let (context, context_entry) = match record.league.as_str() {
                    "nba" => {
                        let Some(params) = &league_config.basketball else { continue };
                        match nba.derive_context(&record.title, today) {
                            Some(ctx) => {
                                let yes_team = yes_outcome_name(&record).unwrap_or_default();
                                let margin = margin_for_yes(&ctx, &yes_team);
                                let win_prob = NbaScoreboard::win_prob_for_yes(&ctx, &yes_team, params);
                                let gate = basketball_gate(&ctx, margin, win_prob, params);
                                (Some(ctx), Some(context_entry_snapshot(yes_team, margin, win_prob, gate)))
                            }
                            None => (None, None),
                        }
                    }
                    "ncaab" => {
                        let Some(params) = &league_config.basketball else { continue };
                        match ncaa.derive_context(&record.title, today) {
                            Some(ctx) => {
                                let yes_team = yes_outcome_name(&record).unwrap_or_default();
                                let margin = margin_for_yes(&ctx, &yes_team);
                                let win_prob = NcaaScoreboard::win_prob_for_yes(&ctx, &yes_team, params);
                                let gate = basketball_gate(&ctx, margin, win_prob, params);
                                (Some(ctx), Some(context_entry_snapshot(yes_team, margin, win_prob, gate)))
                            }
                            None => (None, None),
                        }
                    }
                    "epl" => match soccer.derive_context_with_id(&record.title, today) {
                        Some((event_id, ctx)) => {
                            let yes_team = yes_outcome_name(&record).unwrap_or_default();
                            let margin = margin_for_yes(&ctx, &yes_team);
                            let events = soccer.merged_events(today);
                            let confidence_high = soccer.confidence_high_for(&event_id, &events);
                            let age = soccer.seconds_since_last_score_change(&event_id, now);
                            let win_prob = SoccerScoreboard::win_prob_for_yes(&ctx, &yes_team, 0.03);
                            let gate = match (margin, win_prob) {
                                (Some(m), Some(wp)) => crate::winprob::soccer_entry_gate(
                                    confidence_high,
                                    ctx.period,
                                    m,
                                    ctx.minutes_left,
                                    wp,
                                    age,
                                    runtime.soccer_gate.score_change_cooldown_seconds,
                                ),
                                _ => Err("soccer_not_live"),
                            };
                            (Some(ctx), Some(context_entry_snapshot(yes_team, margin, win_prob, gate)))
                        }
                        None => (None, None),
                    },
                    _ => continue,
                };

                if let Some(ctx) = &context {
                    summary.context_tagged += 1;
                    if let Err(e) = journal.log_context_snapshot(&record.condition_id, now, ctx) {
                        warn!(error = %e, "failed to append context snapshot");
                    }
                }
                watchlist.with_mut(&record.condition_id, |r| {
                    r.context = context;
                    r.context_entry = context_entry;
                });
            }
        }

        // Step 4: TTL / terminal / purge-gate cleanup.
        let expired = watchlist.expire_stale(now, runtime.watchlist_ttl_minutes);
        let open_slugs: HashSet<String> = execution
            .all()
            .iter()
            .filter(|t| t.status == crate::types::TradeStatus::Filled && t.side == crate::types::TradeSide::Buy)
            .map(|t| t.slug.clone())
            .collect();
        let terminal_purged = watchlist.terminal_price_purge(streaming, now, &open_slugs, runtime.terminal_purge_seconds);
        let gate_purged = watchlist.apply_purge_gates(
            now,
            runtime.stale_book_minutes,
            runtime.stale_quote_minutes,
            runtime.stale_tradeability_minutes,
        );
        summary.purged = expired + terminal_purged.len() + gate_purged.len();

        // Steps 5-12: price refresh + gate chain per market.
        let had_pending_at_start = any_pending;
        let mut gating_closed = false;

        let mut records = watchlist.all();
        records.sort_by(|a, b| {
            b.volume_24h
                .partial_cmp(&a.volume_24h)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.last_seen_ts.cmp(&a.last_seen_ts))
                .then(a.slug.cmp(&b.slug))
        });

        for record in records {
            if !matches!(record.status, MarketStatus::Watching | MarketStatus::PendingSignal | MarketStatus::Signaled) {
                continue;
            }
            let (Some(yes_token), Some(no_token)) = (record.yes_token_id.clone(), record.no_token_id.clone()) else {
                continue;
            };

            let ws_fresh = streaming.is_fresh(&yes_token, now, runtime.streaming.max_stale_ms)
                || streaming.is_fresh(&no_token, now, runtime.streaming.max_stale_ms);

            let mut http_book: Option<ParsedBook> = None;
            let (quote, source) = if ws_fresh {
                let quote = complement_price(streaming.get(&yes_token), streaming.get(&no_token));
                (quote, QuoteSource::Ws)
            } else {
                match http_queue.enqueue(self.book_client.fetch_book(&yes_token, runtime.max_levels_considered)).await {
                    Ok(Ok(book)) => {
                        let quote = Quote { best_bid: book.best_bid(), best_ask: book.best_ask() };
                        http_book = Some(book);
                        (quote, QuoteSource::Http)
                    }
                    _ => {
                        metrics.bump_reject(now, &record.league, "book_fetch_failed");
                        watchlist.with_mut(&record.condition_id, |r| {
                            r.last_reject = Some(RejectInfo {
                                reason: "book_fetch_failed".to_string(),
                                ts: now,
                                detail: None,
                            });
                            r.first_bad_tradeability_ts.get_or_insert(now);
                        });
                        continue;
                    }
                }
            };

            // Quote-incomplete bookkeeping.
            let quote_incomplete_reason = match (quote.best_bid, quote.best_ask) {
                (Some(_), Some(_)) => None,
                (None, Some(_)) => Some("missing_best_bid"),
                (Some(_), None) => Some("missing_best_ask"),
                (None, None) => Some("missing_both_sides"),
            };
            watchlist.with_mut(&record.condition_id, |r| {
                match quote_incomplete_reason {
                    Some(_) => {
                        r.first_incomplete_quote_ts.get_or_insert(now);
                    }
                    None => r.first_incomplete_quote_ts = None,
                }
            });

            // Terminal-price HTTP expiry: only applies to still-watching
            // markets priced via the HTTP fallback.
            if record.status == MarketStatus::Watching
                && source == QuoteSource::Http
                && quote.best_bid.map(|b| b >= runtime.terminal_exchange_threshold).unwrap_or(false)
            {
                watchlist.with_mut(&record.condition_id, |r| r.set_status(MarketStatus::Expired, now));
                summary.purged += 1;
                continue;
            }

            watchlist.with_mut(&record.condition_id, |r| {
                r.last_price = Some(PriceSnapshot {
                    best_bid: quote.best_bid,
                    best_ask: quote.best_ask,
                    spread: quote.spread(),
                    updated_ts: now,
                    source,
                });
                r.last_book_update_ts = Some(now);
            });
            summary.price_updates += 1;

            if record.status == MarketStatus::Signaled {
                // Price-update universe only; full gate chain never re-runs.
                let sid = signal_id(record.pending_since_ts.unwrap_or(record.status_since_ts), &record.slug);
                if let Some(buy) = execution.get_buy(&sid) {
                    let unrealized_pnl = quote.best_bid.map(|bid| (bid - buy.avg_fill_price) * buy.filled_shares).unwrap_or(0.0);
                    let tick = PriceTick {
                        signal_id: sid,
                        ts: now,
                        bid: quote.best_bid,
                        ask: quote.best_ask,
                        spread: quote.spread(),
                        entry_price: buy.avg_fill_price,
                        shares: buy.filled_shares,
                        unrealized_pnl,
                    };
                    if let Err(e) = journal.log_price_tick(tick, 30_000) {
                        warn!(error = %e, "failed to append price tick");
                    }
                }
                continue;
            }
            if gating_closed {
                continue;
            }

            // Step 6: league-specific blocking gate (soccer requires an
            // allowed context entry; basketball win_prob flows through
            // stage1 as an optional input instead).
            if record.league == "epl" {
                let blocked_reason = match &record.context_entry {
                    Some(entry) if entry.allowed => None,
                    Some(entry) => Some(entry.blocked_reason.clone().unwrap_or_else(|| "soccer_gate_blocked".to_string())),
                    None => Some("soccer_no_context".to_string()),
                };
                if let Some(reason) = blocked_reason {
                    record_reject(watchlist, metrics, &record, &reason, now);
                    continue;
                }
            }

            let book = match http_book {
                Some(book) => book,
                None => match http_queue.enqueue(self.book_client.fetch_book(&yes_token, runtime.max_levels_considered)).await {
                    Ok(Ok(book)) => book,
                    _ => {
                        record_reject(watchlist, metrics, &record, "depth_book_unavailable", now);
                        watchlist.with_mut(&record.condition_id, |r| {
                            r.first_bad_tradeability_ts.get_or_insert(now);
                        });
                        continue;
                    }
                },
            };

            let (ask_usd, bid_usd) = book.compute_depth(runtime.max_levels_considered);
            watchlist.with_mut(&record.condition_id, |r| {
                r.last_depth = Some(crate::watchlist::DepthSnapshot {
                    entry_depth_usd_ask: ask_usd,
                    exit_depth_usd_bid: bid_usd,
                    bid_levels_used: book.bids.len().min(runtime.max_levels_considered),
                    ask_levels_used: book.asks.len().min(runtime.max_levels_considered),
                    updated_ts: now,
                });
            });

            let thresholds: &StageThresholds = leagues
                .leagues
                .get(&record.league)
                .and_then(|l| l.thresholds.as_ref())
                .unwrap_or(&runtime.default_thresholds);
            // Cooldown asymmetry: entering pending_signal is gated, but
            // re-confirming a pending market for promotion is not (it
            // already paid the cooldown check on entry).
            let cooldown_check = if record.status == MarketStatus::PendingSignal {
                metrics.bump(now, "cooldown_skip_count");
                0
            } else {
                record.cooldown_until_ts
            };

            let outcome: GateOutcome = filters::check_all(
                &quote,
                &book,
                thresholds,
                runtime.max_levels_considered,
                runtime.epsilon,
                cooldown_check,
                now,
            );

            if let Some(reason) = outcome.blocked_reason {
                if record.status != MarketStatus::PendingSignal {
                    record_reject(watchlist, metrics, &record, reason, now);
                }
                if record.status == MarketStatus::PendingSignal && now >= record.pending_deadline_ts.unwrap_or(i64::MAX) {
                    let pending_since = record.pending_since_ts.unwrap_or(now);
                    let sid = signal_id(pending_since, &record.slug);
                    let deadline_delta_ms = now - record.pending_deadline_ts.unwrap_or(now);
                    if let Err(e) = journal.log_signal(&SignalEvent::SignalTimeout {
                        signal_id: sid,
                        condition_id: record.condition_id.clone(),
                        ts: now,
                        reason: reason.to_string(),
                        deadline_delta_ms,
                    }) {
                        warn!(error = %e, "failed to append signal timeout event");
                    }
                    watchlist.with_mut(&record.condition_id, |r| {
                        r.set_status(MarketStatus::Watching, now);
                        r.pending_since_ts = None;
                        r.pending_deadline_ts = None;
                        r.entry_bid_snapshot = None;
                    });
                    metrics.push_pending_timeout(&record.condition_id);
                    metrics.bump(now, "pending_timeout");
                    summary.pending_timed_out += 1;
                }
                continue;
            }

            match record.status {
                MarketStatus::Watching => {
                    let signal_type = Watchlist::classify_signal_type(outcome.near_by);
                    watchlist.with_mut(&record.condition_id, |r| {
                        r.set_status(MarketStatus::PendingSignal, now);
                        r.pending_since_ts = Some(now);
                        r.pending_deadline_ts = Some(now + runtime.pending_window_ms);
                        r.entry_bid_snapshot = quote.best_bid;
                        r.signal_type = Some(signal_type);
                    });
                    metrics.push_pending_enter(&record.condition_id);
                    metrics.bump(now, "pending_opened");
                    summary.pending_opened += 1;
                    let envelope = DecisionEnvelope::allow(
                        signal_id(now, &record.slug),
                        record.condition_id.clone(),
                        outcome.near_by,
                    );
                    summary.decisions.push(envelope);

                    if !had_pending_at_start {
                        gating_closed = true;
                    }
                }
                MarketStatus::PendingSignal => {
                    let sid = signal_id(record.pending_since_ts.unwrap_or(now), &record.slug);
                    let entry_price = record.entry_bid_snapshot.or(quote.best_ask).unwrap_or(0.0);
                    let shares = if entry_price > runtime.epsilon {
                        (runtime.execution.budget_usd / entry_price * 100.0).floor() / 100.0
                    } else {
                        0.0
                    };

                    if let Err(e) = journal.log_signal(&SignalEvent::SignalOpen {
                        signal_id: sid.clone(),
                        condition_id: record.condition_id.clone(),
                        ts: now,
                        signal_type: record.signal_type.map(|s| s.to_string()),
                    }) {
                        warn!(error = %e, "failed to append signal open event");
                    }

                    let trade = execution
                        .buy(
                            &sid,
                            &record.slug,
                            &yes_token,
                            shares,
                            entry_price,
                            runtime.execution_mode,
                            runtime.trading_mode,
                            &runtime.execution,
                            exchange,
                            date_key,
                        )
                        .await;

                    watchlist.with_mut(&record.condition_id, |r| {
                        r.set_status(MarketStatus::Signaled, now);
                        r.signal_count += 1;
                        r.signal_last_ts = Some(now);
                        r.cooldown_until_ts = now + runtime.cooldown_seconds * 1_000;
                    });
                    metrics.push_signal(SignalSnapshot {
                        signal_id: sid.clone(),
                        condition_id: record.condition_id.clone(),
                        signal_type: record.signal_type.map(|s| s.to_string()).unwrap_or_default(),
                        ts: now,
                    });
                    metrics.bump(now, "signaled");
                    summary.signaled += 1;
                    if let Err(e) = journal.log_execution(&trade) {
                        warn!(error = %e, "failed to append trade journal record");
                    }
                    info!(signal_id = %sid, slug = %record.slug, status = ?trade.status, "signal promoted to trade");
                }
                _ => {}
            }
        }

        summary
    }
}

fn record_reject(watchlist: &Watchlist, metrics: &mut Metrics, record: &MarketRecord, reason: &str, now: i64) {
    metrics.bump_reject(now, &record.league, reason);
    watchlist.with_mut(&record.condition_id, |r| {
        r.last_reject = Some(RejectInfo { reason: reason.to_string(), ts: now, detail: None });
    });
}

fn basketball_gate(
    context: &ContextSnapshot,
    margin: Option<f64>,
    win_prob: Option<f64>,
    params: &crate::config::BasketballParams,
) -> Result<(), &'static str> {
    match (margin, win_prob) {
        (Some(m), Some(wp)) => crate::winprob::basketball_entry_gate(context.period, context.minutes_left, m, wp, params),
        _ => Err("basketball_not_live"),
    }
}

fn context_entry_snapshot(
    yes_team: String,
    margin: Option<f64>,
    win_prob: Option<f64>,
    gate: Result<(), &'static str>,
) -> ContextEntrySnapshot {
    ContextEntrySnapshot {
        yes_outcome_name: yes_team,
        margin_for_yes: margin,
        win_prob,
        allowed: gate.is_ok(),
        blocked_reason: gate.err().map(|s| s.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::CachedQuote;

    fn quote(bid: Option<f64>, ask: Option<f64>) -> CachedQuote {
        CachedQuote { best_bid: bid, best_ask: ask, last_update_ms: 0 }
    }

    #[test]
    fn complement_price_uses_both_sides() {
        let yes = quote(Some(0.60), Some(0.62));
        let no = quote(Some(0.36), Some(0.40));
        let q = complement_price(Some(yes), Some(no));
        // ask = min(0.62, 1-0.36=0.64) = 0.62; bid = max(0.60, 1-0.40=0.60) = 0.60
        assert_eq!(q.best_ask, Some(0.62));
        assert_eq!(q.best_bid, Some(0.60));
    }

    #[test]
    fn complement_price_falls_back_to_single_side() {
        let yes = quote(Some(0.60), Some(0.62));
        let q = complement_price(Some(yes), None);
        assert_eq!(q.best_ask, Some(0.62));
        assert_eq!(q.best_bid, Some(0.60));
    }

    #[test]
    fn complement_price_none_when_both_missing() {
        let q = complement_price(None, None);
        assert_eq!(q.best_ask, None);
        assert_eq!(q.best_bid, None);
    }

    #[test]
    fn yes_outcome_name_uses_token_pair_index() {
        let mut record = sample_record();
        record.token_pair = vec!["tokA".to_string(), "tokB".to_string()];
        record.outcomes = vec!["Lakers".to_string(), "Celtics".to_string()];
        record.yes_token_id = Some("tokB".to_string());
        assert_eq!(yes_outcome_name(&record), Some("Celtics".to_string()));
    }

    #[test]
    fn margin_for_yes_handles_swapped_sides() {
        let ctx = ContextSnapshot {
            state: crate::types::GameState::In,
            period: 4,
            minutes_left: 2.0,
            team_a: "Lakers".into(),
            team_a_score: Some(100),
            team_b: "Celtics".into(),
            team_b_score: Some(90),
            decided: true,
        };
        assert_eq!(margin_for_yes(&ctx, "Celtics"), Some(-10.0));
        assert_eq!(margin_for_yes(&ctx, "Lakers"), Some(10.0));
    }

    fn sample_record() -> MarketRecord {
        // Constructed through `Watchlist::upsert` in integration tests;
        // here we only need the fields `yes_outcome_name` reads.
        use crate::discovery::MarketCandidate;
        let watchlist = Watchlist::new();
        watchlist.upsert(
            &MarketCandidate {
                condition_id: "c1".to_string(),
                league: "nba".to_string(),
                slug: "lal-bos".to_string(),
                title: "Lakers vs Celtics".to_string(),
                token_pair: vec!["tokA".to_string(), "tokB".to_string()],
                outcomes: vec!["Lakers".to_string(), "Celtics".to_string()],
                volume_24h: 1000.0,
                end_date: "2026-08-01T00:00:00Z".to_string(),
                event_id: "e1".to_string(),
                event_slug: "lal-bos".to_string(),
            },
            0,
        );
        watchlist.get("c1").unwrap()
    }
}
