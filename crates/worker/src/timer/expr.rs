//! Cron expressions.
//!
//! ```text
//! field          required  values  special characters
//! second         no        0-59    * / , -
//! minute         yes       0-59    * / , -
//! hour           yes       0-23    * / , -
//! day of month   yes       1-31    * / , -
//! month          yes       1-12    * / , -
//! day of week    yes       0-6     * / , -
//! ```
//!
//! A five-field expression fires at second zero. When both day fields are
//! restricted a day matches if either one does.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Timelike};
use thiserror::Error;

/// Reason a single field of a cron expression was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
	#[error("too many slashes")]
	TooManySlashes,
	#[error("too many hyphens")]
	TooManyHyphens,
	#[error("invalid range")]
	InvalidRange,
	#[error("out of range [{min}, {max}]")]
	OutOfRange { min: u32, max: u32 },
	#[error("invalid increment")]
	InvalidIncrement,
	#[error("invalid number")]
	InvalidNumber,
}

/// Error parsing a [`CronExpr`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronExprError {
	#[error("invalid cron expression {expr:?}: expected 5 or 6 fields, got {found}")]
	FieldCount { expr: String, found: usize },
	#[error("invalid {name} field {text:?}: {reason}")]
	Field {
		name: &'static str,
		text: String,
		#[source]
		reason: FieldError,
	},
}

struct FieldSpec {
	name: &'static str,
	min: u32,
	max: u32,
}

const FIELDS: [FieldSpec; 6] = [
	FieldSpec { name: "second", min: 0, max: 59 },
	FieldSpec { name: "minute", min: 0, max: 59 },
	FieldSpec { name: "hour", min: 0, max: 23 },
	FieldSpec { name: "day-of-month", min: 1, max: 31 },
	FieldSpec { name: "month", min: 1, max: 12 },
	FieldSpec { name: "day-of-week", min: 0, max: 6 },
];

const ANY_DOM: u64 = 0xffff_fffe;
const ANY_DOW: u64 = 0x7f;

/// Parsed cron expression, one bitmask per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CronExpr {
	sec: u64,
	min: u64,
	hour: u64,
	dom: u64,
	month: u64,
	dow: u64,
}

impl CronExpr {
	/// Parses a five- or six-field expression.
	pub fn parse(expr: &str) -> Result<Self, CronExprError> {
		let mut fields: Vec<&str> = expr.split_whitespace().collect();
		match fields.len() {
			5 => fields.insert(0, "0"),
			6 => {}
			found => {
				return Err(CronExprError::FieldCount {
					expr: expr.to_string(),
					found,
				});
			}
		}

		let mut masks = [0u64; 6];
		for ((mask, text), range) in masks.iter_mut().zip(&fields).zip(&FIELDS) {
			*mask = parse_field(text, range.min, range.max).map_err(|reason| CronExprError::Field {
				name: range.name,
				text: (*text).to_string(),
				reason,
			})?;
		}
		let [sec, min, hour, dom, month, dow] = masks;
		Ok(Self {
			sec,
			min,
			hour,
			dom,
			month,
			dow,
		})
	}

	/// First matching instant strictly after `after`, in `after`'s time zone.
	///
	/// Returns `None` when nothing matches before the end of the following
	/// year. Local times skipped by a zone transition never match.
	pub fn next<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
		let zone = after.timezone();
		let mut naive = after.naive_local();
		loop {
			let candidate = self.next_naive(naive)?;
			if let Some(at) = zone.from_local_datetime(&candidate).earliest()
				&& at > *after
			{
				return Some(at);
			}
			naive = candidate;
		}
	}

	/// Wall-clock search without zone information.
	pub fn next_naive(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
		let mut t = after.with_nanosecond(0)? + TimeDelta::seconds(1);
		let last_year = t.year() + 1;
		let mut aligned = false;

		'retry: loop {
			if t.year() > last_year {
				return None;
			}

			while !has(self.month, t.month()) {
				if !aligned {
					aligned = true;
					t = NaiveDate::from_ymd_opt(t.year(), t.month(), 1)?.and_hms_opt(0, 0, 0)?;
				}
				t = first_of_next_month(t)?;
				if t.month() == 1 {
					continue 'retry;
				}
			}

			while !self.matches_day(t.date()) {
				if !aligned {
					aligned = true;
					t = t.date().and_hms_opt(0, 0, 0)?;
				}
				t += TimeDelta::days(1);
				if t.day() == 1 {
					continue 'retry;
				}
			}

			while !has(self.hour, t.hour()) {
				if !aligned {
					aligned = true;
					t = t.with_minute(0)?.with_second(0)?;
				}
				t += TimeDelta::hours(1);
				if t.hour() == 0 {
					continue 'retry;
				}
			}

			while !has(self.min, t.minute()) {
				if !aligned {
					aligned = true;
					t = t.with_second(0)?;
				}
				t += TimeDelta::minutes(1);
				if t.minute() == 0 {
					continue 'retry;
				}
			}

			while !has(self.sec, t.second()) {
				aligned = true;
				t += TimeDelta::seconds(1);
				if t.second() == 0 {
					continue 'retry;
				}
			}

			return Some(t);
		}
	}

	fn matches_day(&self, date: NaiveDate) -> bool {
		let dow = has(self.dow, date.weekday().num_days_from_sunday());
		let dom = has(self.dom, date.day());
		if self.dom == ANY_DOM {
			dow
		} else if self.dow == ANY_DOW {
			dom
		} else {
			dow || dom
		}
	}
}

impl FromStr for CronExpr {
	type Err = CronExprError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl fmt::Display for CronExpr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let masks = [self.sec, self.min, self.hour, self.dom, self.month, self.dow];
		for (i, (mask, range)) in masks.iter().zip(&FIELDS).enumerate() {
			if i > 0 {
				f.write_str(" ")?;
			}
			let values: Vec<String> = (range.min..=range.max).filter(|&v| has(*mask, v)).map(|v| v.to_string()).collect();
			f.write_str(&values.join(","))?;
		}
		Ok(())
	}
}

fn has(mask: u64, value: u32) -> bool {
	mask & (1 << value) != 0
}

fn first_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
	let (year, month) = if t.month() == 12 { (t.year() + 1, 1) } else { (t.year(), t.month() + 1) };
	NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

/// Parses one field: a comma list of `*`, `a`, `a-b`, `*/n`, `a/n` or `a-b/n`.
fn parse_field(field: &str, min: u32, max: u32) -> Result<u64, FieldError> {
	let mut mask = 0u64;
	for part in field.split(',') {
		let range_and_step: Vec<&str> = part.split('/').collect();
		if range_and_step.len() > 2 {
			return Err(FieldError::TooManySlashes);
		}
		let bounds: Vec<&str> = range_and_step[0].split('-').collect();
		if bounds.len() > 2 {
			return Err(FieldError::TooManyHyphens);
		}

		let (start, end) = if bounds[0] == "*" {
			if bounds.len() != 1 {
				return Err(FieldError::InvalidRange);
			}
			(min, max)
		} else {
			let start = number(bounds[0])?;
			let end = match (bounds.get(1), range_and_step.len()) {
				(Some(end), _) => number(end)?,
				// `a/n` runs from `a` to the field maximum.
				(None, 2) => max,
				(None, _) => start,
			};
			(start, end)
		};
		if start > end {
			return Err(FieldError::InvalidRange);
		}
		if start < min || end > max {
			return Err(FieldError::OutOfRange { min, max });
		}

		let step = match range_and_step.get(1) {
			Some(step) => number(step)?,
			None => 1,
		};
		if step == 0 {
			return Err(FieldError::InvalidIncrement);
		}
		mask |= (start..=end).step_by(step as usize).fold(0u64, |acc, v| acc | (1 << v));
	}
	Ok(mask)
}

fn number(text: &str) -> Result<u32, FieldError> {
	text.parse().map_err(|_| FieldError::InvalidNumber)
}
