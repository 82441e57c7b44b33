use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, SchedulerError};

/// How far ahead a cron trigger is searched before it counts as exhausted.
const CRON_SEARCH_DAYS: i64 = 366 * 8;

/// Cron fields from most to least significant.
const CRON_FIELDS: [&str; 8] = [
    "year",
    "month",
    "day",
    "week",
    "day_of_week",
    "hour",
    "minute",
    "second",
];

/// Value a field takes when it is less significant than every given field.
const CRON_MINIMUMS: [&str; 8] = ["*", "1", "1", "*", "*", "0", "0", "0"];

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Date,
    Interval,
    Cron,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerKind::Date => "date",
            TriggerKind::Interval => "interval",
            TriggerKind::Cron => "cron",
        };
        f.write_str(s)
    }
}

/// Trigger descriptor as it travels over the wire and sits in storage.
///
/// Internally tagged by `trigger`, so `{"trigger":"cron","hour":"3"}` is a
/// complete descriptor. Unknown fields are refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "lowercase", deny_unknown_fields)]
pub enum TriggerSpec {
    /// Fires once at `run_date`.
    Date { run_date: DateTime<Utc> },

    /// Fires every `weeks + days + hours + minutes + seconds`.
    Interval {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weeks: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        days: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hours: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minutes: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seconds: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_date: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_date: Option<DateTime<Utc>>,
    },

    /// Fires whenever every given field matches. Fields accept cron-style
    /// expressions (`*`, `a-b`, `*/n`, `a,b`) or plain integers.
    Cron {
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "field_expr")]
        year: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "field_expr")]
        month: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "field_expr")]
        day: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "field_expr")]
        week: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "field_expr")]
        day_of_week: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "field_expr")]
        hour: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "field_expr")]
        minute: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "field_expr")]
        second: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_date: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_date: Option<DateTime<Utc>>,
    },
}

impl TriggerSpec {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerSpec::Date { .. } => TriggerKind::Date,
            TriggerSpec::Interval { .. } => TriggerKind::Interval,
            TriggerSpec::Cron { .. } => TriggerKind::Cron,
        }
    }

    /// A date trigger whose instant is not after `now`. Never true for the
    /// repeating kinds.
    pub fn has_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self {
            TriggerSpec::Date { run_date } => *run_date <= now,
            _ => false,
        }
    }

    /// Pin an unanchored interval to `now + interval`. Other triggers are
    /// returned unchanged.
    pub fn anchored(self, now: DateTime<Utc>) -> Self {
        match self {
            TriggerSpec::Interval {
                weeks,
                days,
                hours,
                minutes,
                seconds,
                start_date: None,
                end_date,
            } => {
                let start_date = interval_length(weeks, days, hours, minutes, seconds)
                    .filter(|every| *every > Duration::zero())
                    .and_then(|every| now.checked_add_signed(every));
                TriggerSpec::Interval {
                    weeks,
                    days,
                    hours,
                    minutes,
                    seconds,
                    start_date,
                    end_date,
                }
            }
            other => other,
        }
    }
}

/// A validated trigger ready to compute fire times.
#[derive(Debug, Clone)]
pub struct Trigger {
    spec: TriggerSpec,
    compiled: Compiled,
}

#[derive(Debug, Clone)]
enum Compiled {
    Date(DateTime<Utc>),
    Interval {
        every: Duration,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    },
    Cron {
        schedule: cron::Schedule,
        week: Option<FieldExpr>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
}

impl Trigger {
    /// Validate `spec`, anchoring an unanchored interval at `now`.
    pub fn new(spec: TriggerSpec, now: DateTime<Utc>) -> Result<Self> {
        let spec = spec.anchored(now);
        let compiled = match &spec {
            TriggerSpec::Date { run_date } => Compiled::Date(*run_date),
            TriggerSpec::Interval {
                weeks,
                days,
                hours,
                minutes,
                seconds,
                start_date,
                end_date,
            } => {
                let every = interval_length(*weeks, *days, *hours, *minutes, *seconds)
                    .ok_or_else(|| SchedulerError::InvalidTrigger("interval is too large".into()))?;
                if every <= Duration::zero() {
                    return Err(SchedulerError::InvalidTrigger(
                        "interval must be positive".into(),
                    ));
                }
                Compiled::Interval {
                    every,
                    start: start_date.unwrap_or(now),
                    end: *end_date,
                }
            }
            TriggerSpec::Cron {
                year,
                month,
                day,
                week,
                day_of_week,
                hour,
                minute,
                second,
                start_date,
                end_date,
            } => {
                let fields = [
                    year.as_deref(),
                    month.as_deref(),
                    day.as_deref(),
                    week.as_deref(),
                    day_of_week.as_deref(),
                    hour.as_deref(),
                    minute.as_deref(),
                    second.as_deref(),
                ];
                let (schedule, week) = compile_cron(fields)?;
                Compiled::Cron {
                    schedule,
                    week,
                    start: *start_date,
                    end: *end_date,
                }
            }
        };
        Ok(Self { spec, compiled })
    }

    pub fn spec(&self) -> &TriggerSpec {
        &self.spec
    }

    /// The fire instant following `previous`, or the first one at or after
    /// `now` when the job has not fired yet. `None` once the trigger is done.
    pub fn next_fire_time(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match &self.compiled {
            Compiled::Date(at) => match previous {
                Some(_) => None,
                None => Some(*at),
            },

            Compiled::Interval { every, start, end } => {
                let next = match previous {
                    Some(prev) => prev.checked_add_signed(*every)?,
                    None if now <= *start => *start,
                    None => {
                        // First fire on the interval grid at or after `now`.
                        let step = every.num_milliseconds();
                        let elapsed = (now - *start).num_milliseconds();
                        let steps = (elapsed + step - 1) / step;
                        start.checked_add_signed(Duration::milliseconds(steps.checked_mul(step)?))?
                    }
                };
                within(next, *end)
            }

            Compiled::Cron {
                schedule,
                week,
                start,
                end,
            } => {
                let base = match previous {
                    Some(prev) => prev,
                    None => start.map_or(now, |s| s.max(now)) - Duration::milliseconds(1),
                };
                let horizon = base + Duration::days(CRON_SEARCH_DAYS);
                schedule
                    .after(&base)
                    .take_while(|t| *t <= horizon && end.map_or(true, |e| *t <= e))
                    .find(|t| week.as_ref().map_or(true, |w| w.matches(t.iso_week().week())))
            }
        }
    }
}

fn within(at: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match end {
        Some(end) if at > end => None,
        _ => Some(at),
    }
}

fn interval_length(
    weeks: Option<i64>,
    days: Option<i64>,
    hours: Option<i64>,
    minutes: Option<i64>,
    seconds: Option<i64>,
) -> Option<Duration> {
    let parts = [
        (weeks, 7 * 24 * 3600),
        (days, 24 * 3600),
        (hours, 3600),
        (minutes, 60),
        (seconds, 1),
    ];
    let mut total: i64 = 0;
    for (value, unit) in parts {
        total = total.checked_add(value.unwrap_or(0).checked_mul(unit)?)?;
    }
    Duration::try_seconds(total)
}

/// Build the 7-field expression the `cron` crate understands
/// (`sec min hour dom month dow year`) plus the ISO-week filter it lacks.
fn compile_cron(fields: [Option<&str>; 8]) -> Result<(cron::Schedule, Option<FieldExpr>)> {
    let last_given = fields.iter().rposition(Option::is_some);
    let resolved: [String; 8] = std::array::from_fn(|i| match fields[i] {
        Some(value) => value.trim().to_string(),
        None if last_given.is_some_and(|last| i > last) => CRON_MINIMUMS[i].to_string(),
        None => "*".to_string(),
    });
    if let Some(i) = resolved.iter().position(String::is_empty) {
        return Err(SchedulerError::InvalidTrigger(format!(
            "cron field '{}' is empty",
            CRON_FIELDS[i]
        )));
    }
    let [year, month, day, week, day_of_week, hour, minute, second] = resolved;

    let day_of_week = translate_day_of_week(&day_of_week)?;
    let expr = format!("{second} {minute} {hour} {day} {month} {day_of_week} {year}");
    let schedule = cron::Schedule::from_str(&expr)
        .map_err(|e| SchedulerError::InvalidTrigger(format!("cron '{expr}': {e}")))?;

    let week = match week.as_str() {
        "*" => None,
        expr => Some(FieldExpr::parse(expr, 1, 53)?),
    };
    Ok((schedule, week))
}

/// Rewrite numeric weekdays (0 = Monday) as names, which the `cron` crate
/// reads unambiguously.
fn translate_day_of_week(expr: &str) -> Result<String> {
    let parts = expr
        .split(',')
        .map(|part| {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (part, None),
            };
            let range = match range.trim() {
                "*" | "?" => range.trim().to_string(),
                r => match r.split_once('-') {
                    Some((from, to)) => format!("{}-{}", weekday(from)?, weekday(to)?),
                    None => weekday(r)?.to_string(),
                },
            };
            Ok(match step {
                Some(step) => format!("{range}/{}", step.trim()),
                None => range,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join(","))
}

fn weekday(token: &str) -> Result<&'static str> {
    let token = token.trim();
    let found = match token.parse::<usize>() {
        Ok(n) => WEEKDAYS.get(n).copied(),
        Err(_) => WEEKDAYS
            .iter()
            .copied()
            .find(|d| d.eq_ignore_ascii_case(token)),
    };
    found.ok_or_else(|| SchedulerError::InvalidTrigger(format!("unknown day of week '{token}'")))
}

/// A numeric cron field (`*`, `n`, `a-b`, `*/s`, `a-b/s`, comma lists).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldExpr {
    /// `(low, high, step)` ranges, inclusive.
    ranges: Vec<(u32, u32, u32)>,
}

impl FieldExpr {
    pub fn parse(expr: &str, min: u32, max: u32) -> Result<Self> {
        let invalid = |part: &str| SchedulerError::InvalidTrigger(format!("invalid field '{part}'"));
        let number = |s: &str, part: &str| s.trim().parse::<u32>().map_err(|_| invalid(part));

        let mut ranges = Vec::new();
        for part in expr.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => (range, Some(number(step, part)?)),
                None => (part, None),
            };
            let (low, high) = match range.trim() {
                "*" => (min, max),
                r => match r.split_once('-') {
                    Some((a, b)) => (number(a, part)?, number(b, part)?),
                    None => {
                        let n = number(r, part)?;
                        (n, if step.is_some() { max } else { n })
                    }
                },
            };
            let step = step.unwrap_or(1);
            if step == 0 || low > high || low < min || high > max {
                return Err(invalid(part));
            }
            ranges.push((low, high, step));
        }
        Ok(Self { ranges })
    }

    pub fn matches(&self, value: u32) -> bool {
        self.ranges
            .iter()
            .any(|&(low, high, step)| value >= low && value <= high && (value - low) % step == 0)
    }
}

/// Accept cron fields as strings or bare integers; `null` is absent.
fn field_expr<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }
    Ok(Option::<Raw>::deserialize(d)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    }))
}
