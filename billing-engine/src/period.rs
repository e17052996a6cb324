//! Billing-period arithmetic.
//!
//! Pure computation of period boundaries and bill dates. Consecutive periods
//! are adjacent at one-second granularity: a period ends one time unit before
//! the next one starts. Calendar billing (`snap_to_nth_day`) snaps the period
//! end forward to the next occurrence of a day-of-month (monthly plans) or
//! ISO weekday (weekly plans) instead of applying a fixed offset.

use crate::error::BillingError;
use crate::models::{BillIn, BillingInterval, BillingPeriod, BillingPlan, Subscription};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, Utc};

/// Period and bill-date calculator for one subscription under one plan.
pub struct PeriodCalculator<'a> {
    plan: &'a BillingPlan,
    sub: &'a Subscription,
}

impl<'a> PeriodCalculator<'a> {
    pub fn new(plan: &'a BillingPlan, sub: &'a Subscription) -> Self {
        Self { plan, sub }
    }

    /// Calendar billing is incompatible with multi-unit intervals and only
    /// defined for monthly and weekly plans. Rejected at modification time.
    pub fn validate_calendar_billing(
        plan: &BillingPlan,
        snap_to_nth_day: Option<u32>,
    ) -> Result<(), BillingError> {
        let day = match snap_to_nth_day {
            Some(d) if d > 0 => d,
            _ => return Ok(()),
        };

        if plan.interval_count > 1 {
            return Err(BillingError::Validation(anyhow::anyhow!(
                "calendar billing cannot be combined with an interval count of {}",
                plan.interval_count
            )));
        }

        match plan.interval() {
            BillingInterval::Monthly if (1..=31).contains(&day) => Ok(()),
            BillingInterval::Weekly if (1..=7).contains(&day) => Ok(()),
            BillingInterval::Monthly | BillingInterval::Weekly => {
                Err(BillingError::Validation(anyhow::anyhow!(
                    "day {} is not a valid calendar billing anchor",
                    day
                )))
            }
            other => Err(BillingError::Validation(anyhow::anyhow!(
                "calendar billing is not supported for {} plans",
                other.as_str()
            ))),
        }
    }

    /// End of the period anchored at `start`: start + interval − 1 second, or
    /// one second before the next calendar anchor when snapping is on.
    pub fn period_end_for(&self, start: DateTime<Utc>) -> Result<DateTime<Utc>, BillingError> {
        let end = match self.sub.snap_to_nth_day.filter(|d| *d > 0) {
            Some(day) => {
                Self::validate_calendar_billing(self.plan, Some(day))?;
                let anchor = match self.plan.interval() {
                    BillingInterval::Weekly => next_nth_weekday(start, day),
                    _ => next_nth_day_of_month(start, day),
                };
                anchor - Duration::seconds(1)
            }
            None => {
                add_interval(start, self.plan.interval(), self.plan.interval_count)
                    - Duration::seconds(1)
            }
        };
        Ok(nudge_period_end(end))
    }

    /// The instant an invoice should be generated for a period.
    pub fn bill_date_for(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> DateTime<Utc> {
        match self.sub.billing_mode() {
            BillIn::Advance => {
                let lead = start - Duration::days(self.sub.bill_in_advance_days.max(0));
                // Day-1 subscriptions never bill before the period itself.
                if lead < self.sub.start_date {
                    start
                } else {
                    lead
                }
            }
            BillIn::Arrears => end,
        }
    }

    /// First period of a new subscription, anchored at its start date.
    pub fn initial(&self) -> Result<BillingPeriod, BillingError> {
        self.period_starting(self.sub.start_date)
    }

    /// Period immediately following the subscription's current one.
    pub fn next_period(&self) -> Result<BillingPeriod, BillingError> {
        self.period_starting(self.sub.period_end + Duration::seconds(1))
    }

    /// Period anchored at an arbitrary start.
    pub fn period_starting(&self, start: DateTime<Utc>) -> Result<BillingPeriod, BillingError> {
        let end = self.period_end_for(start)?;
        Ok(BillingPeriod {
            start,
            end,
            bill_date: self.bill_date_for(start, end),
        })
    }

    /// Billing period to apply when resuming a paused subscription.
    ///
    /// A desired end in the past is recomputed from `now`; a period is never
    /// backfilled entirely behind the clock, and the resulting start never
    /// moves backwards from the start in effect before the pause. A desired
    /// end that lands before the current period start is rejected.
    pub fn resume_period(
        &self,
        now: DateTime<Utc>,
        desired_end: Option<DateTime<Utc>>,
    ) -> Result<BillingPeriod, BillingError> {
        if let Some(desired) = desired_end {
            let end = if self.sub.calendar_billing() {
                self.period_end_for(desired.max(now))?
            } else {
                nudge_period_end(desired)
            };

            if end <= now {
                let start = now.max(self.sub.period_start);
                return self.period_starting(start);
            }

            // A period can never end before it starts, and resuming never
            // moves the start backwards.
            if end <= self.sub.period_start {
                return Err(BillingError::Validation(anyhow::anyhow!(
                    "requested period end {} lies before the current period start {}",
                    end,
                    self.sub.period_start
                )));
            }

            let start = self.sub.period_start;
            return Ok(BillingPeriod {
                start,
                end,
                bill_date: self.bill_date_for(start, end),
            });
        }

        if self.sub.period_end <= now {
            let start = now.max(self.sub.period_start);
            self.period_starting(start)
        } else {
            let (start, end) = (self.sub.period_start, self.sub.period_end);
            Ok(BillingPeriod {
                start,
                end,
                bill_date: self.bill_date_for(start, end),
            })
        }
    }
}

/// Contract period spanning `cycles` billing periods from `start`.
pub fn contract_period_from(
    start: DateTime<Utc>,
    plan: &BillingPlan,
    cycles: i32,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = add_interval(start, plan.interval(), plan.interval_count * cycles.max(1))
        - Duration::seconds(1);
    (start, nudge_period_end(end))
}

/// Advance a date by one plan interval, `count` times.
pub fn add_interval(start: DateTime<Utc>, interval: BillingInterval, count: i32) -> DateTime<Utc> {
    let count = count.max(1);
    match interval {
        BillingInterval::Daily => start + Duration::days(count as i64),
        BillingInterval::Weekly => start + Duration::weeks(count as i64),
        BillingInterval::Monthly => start + Months::new(count as u32),
        BillingInterval::Quarterly => start + Months::new((count * 3) as u32),
        BillingInterval::Annually => start + Months::new((count * 12) as u32),
    }
}

/// Period ends on an even UNIX timestamp are pulled back one second so that
/// consecutive periods can never collide on exact midnight boundaries.
/// Preserved for compatibility with historical billing dates.
pub fn nudge_period_end(end: DateTime<Utc>) -> DateTime<Utc> {
    if end.timestamp() % 2 == 0 {
        end - Duration::seconds(1)
    } else {
        end
    }
}

/// Midnight of the next occurrence of the given day-of-month strictly after
/// `after`. Days beyond a month's length clamp to the month's last day.
fn next_nth_day_of_month(after: DateTime<Utc>, day: u32) -> DateTime<Utc> {
    let (mut year, mut month) = (after.year(), after.month());
    for _ in 0..2 {
        let clamped = day.min(days_in_month(year, month));
        let candidate = NaiveDate::from_ymd_opt(year, month, clamped)
            .map(|d| d.and_time(NaiveTime::MIN).and_utc())
            .unwrap_or(after);
        if candidate > after {
            return candidate;
        }
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    after + Months::new(1)
}

/// Midnight of the next occurrence of the given ISO weekday (1 = Monday)
/// strictly after `after`.
fn next_nth_weekday(after: DateTime<Utc>, day: u32) -> DateTime<Utc> {
    let mut date = after.date_naive() + Duration::days(1);
    for _ in 0..7 {
        if date.weekday().number_from_monday() == day {
            break;
        }
        date = date + Duration::days(1);
    }
    date.and_time(NaiveTime::MIN).and_utc()
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContractRenewalMode;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn plan(interval: BillingInterval, count: i32) -> BillingPlan {
        BillingPlan {
            plan_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Test".into(),
            description: None,
            billing_interval: interval.as_str().into(),
            interval_count: count,
            base_price: Decimal::from(100),
            currency: "USD".into(),
            is_active: true,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    fn subscription(start: DateTime<Utc>) -> Subscription {
        Subscription {
            subscription_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            addon_ids: vec![],
            coupon_redemption_ids: vec![],
            start_date: start,
            period_start: start,
            period_end: start,
            renews_next: None,
            renewed_last: None,
            num_invoices: 0,
            bill_in: BillIn::Advance.as_str().into(),
            bill_in_advance_days: 0,
            snap_to_nth_day: None,
            cycles: 0,
            contract_period_start: None,
            contract_period_end: None,
            contract_renewal_mode: ContractRenewalMode::None.as_str().into(),
            contract_renewal_cycles: None,
            pending_renewal: false,
            paused: false,
            canceled: false,
            canceled_at: None,
            cancellation_reason: None,
            cancel_at_period_end: false,
            finished: false,
            status: "active".into(),
            mrr: Decimal::ZERO,
            recurring_total: Decimal::ZERO,
            prorate: true,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    #[test]
    fn monthly_period_ends_one_second_before_next_anniversary() {
        let start = Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap();
        let sub = subscription(start);
        let plan = plan(BillingInterval::Monthly, 1);
        let calc = PeriodCalculator::new(&plan, &sub);

        let end = calc.period_end_for(start).unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 4, 14, 23, 59, 59).unwrap();
        assert!(end == expected || end == expected - Duration::seconds(1));
        assert_eq!(end.timestamp() % 2, 1);
    }

    #[test]
    fn even_timestamp_period_ends_are_nudged_back() {
        let even = Utc.timestamp_opt(1_767_225_600, 0).unwrap();
        assert_eq!(nudge_period_end(even), even - Duration::seconds(1));
        let odd = Utc.timestamp_opt(1_767_225_601, 0).unwrap();
        assert_eq!(nudge_period_end(odd), odd);
    }

    #[test]
    fn snapped_monthly_period_ends_before_nth_day() {
        let start = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let mut sub = subscription(start);
        sub.snap_to_nth_day = Some(1);
        let plan = plan(BillingInterval::Monthly, 1);
        let calc = PeriodCalculator::new(&plan, &sub);

        let end = calc.period_end_for(start).unwrap();
        assert_eq!(end.month(), 3);
        assert_eq!(end.day(), 31);
    }

    #[test]
    fn snapping_rejects_multi_unit_intervals() {
        let plan = plan(BillingInterval::Monthly, 3);
        let err = PeriodCalculator::validate_calendar_billing(&plan, Some(15)).unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }

    #[test]
    fn snapping_rejects_unsupported_intervals() {
        let plan = plan(BillingInterval::Annually, 1);
        assert!(PeriodCalculator::validate_calendar_billing(&plan, Some(15)).is_err());
        // disabled anchor is always fine
        assert!(PeriodCalculator::validate_calendar_billing(&plan, Some(0)).is_ok());
        assert!(PeriodCalculator::validate_calendar_billing(&plan, None).is_ok());
    }

    #[test]
    fn advance_bill_date_never_precedes_subscription_start() {
        let start = Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap();
        let mut sub = subscription(start);
        sub.bill_in_advance_days = 7;
        let plan = plan(BillingInterval::Monthly, 1);
        let calc = PeriodCalculator::new(&plan, &sub);

        // First period: lead time would land before the subscription exists.
        let first = calc.initial().unwrap();
        assert_eq!(first.bill_date, start);

        // Later periods honor the advance lead.
        let second_start = first.end + Duration::seconds(1);
        let second_end = calc.period_end_for(second_start).unwrap();
        let bill = calc.bill_date_for(second_start, second_end);
        assert_eq!(bill, second_start - Duration::days(7));
    }

    #[test]
    fn arrears_bills_at_period_end() {
        let start = Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap();
        let mut sub = subscription(start);
        sub.bill_in = BillIn::Arrears.as_str().into();
        let plan = plan(BillingInterval::Monthly, 1);
        let calc = PeriodCalculator::new(&plan, &sub);

        let p = calc.initial().unwrap();
        assert_eq!(p.bill_date, p.end);
    }

    #[test]
    fn resume_never_backfills_a_fully_elapsed_period() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let mut sub = subscription(start);
        let plan = plan(BillingInterval::Monthly, 1);
        sub.period_end = Utc.with_ymd_and_hms(2020, 1, 31, 23, 59, 59).unwrap();

        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let calc = PeriodCalculator::new(&plan, &sub);
        let p = calc.resume_period(now, None).unwrap();
        assert_eq!(p.start, now);
        assert!(p.end > now);
    }

    #[test]
    fn resume_with_past_desired_end_recomputes_from_now() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let sub = subscription(start);
        let plan = plan(BillingInterval::Monthly, 1);
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let desired = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();

        let calc = PeriodCalculator::new(&plan, &sub);
        let p = calc.resume_period(now, Some(desired)).unwrap();
        assert!(p.start >= sub.period_start);
        assert!(p.end > now);
    }

    #[test]
    fn resume_rejects_desired_end_before_the_current_period_start() {
        // Trial period starting in the future; the pause outlives nothing.
        let start = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
        let sub = subscription(start);
        let plan = plan(BillingInterval::Monthly, 1);
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        let desired = Utc.with_ymd_and_hms(2026, 8, 11, 0, 0, 0).unwrap();

        let calc = PeriodCalculator::new(&plan, &sub);
        let err = calc.resume_period(now, Some(desired)).unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }

    #[test]
    fn resume_with_future_desired_end_keeps_the_period_start() {
        let start = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
        let sub = subscription(start);
        let plan = plan(BillingInterval::Monthly, 1);
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        let desired = Utc.with_ymd_and_hms(2026, 11, 15, 0, 0, 0).unwrap();

        let calc = PeriodCalculator::new(&plan, &sub);
        let p = calc.resume_period(now, Some(desired)).unwrap();
        assert_eq!(p.start, sub.period_start);
        assert!(p.end > p.start);
    }

    #[test]
    fn next_nth_day_clamps_to_short_months() {
        let after = Utc.with_ymd_and_hms(2026, 2, 10, 0, 0, 0).unwrap();
        let snapped = next_nth_day_of_month(after, 31);
        assert_eq!(snapped.month(), 2);
        assert_eq!(snapped.day(), 28);
    }

    #[test]
    fn next_weekday_is_strictly_after() {
        // 2026-03-16 is a Monday.
        let monday = Utc.with_ymd_and_hms(2026, 3, 16, 0, 0, 0).unwrap();
        let next_monday = next_nth_weekday(monday, 1);
        assert_eq!(next_monday.weekday().number_from_monday(), 1);
        assert_eq!(next_monday - monday, Duration::days(7));
    }

    #[test]
    fn contract_period_spans_all_cycles() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let plan = plan(BillingInterval::Monthly, 1);
        let (s, e) = contract_period_from(start, &plan, 12);
        assert_eq!(s, start);
        assert_eq!(e.year(), 2026);
        assert_eq!(e.month(), 12);
        assert_eq!(e.day(), 31);
    }
}
