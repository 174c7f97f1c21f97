// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::TimeZone;
use chrono_tz::Tz;
use yare::parameterized;

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

#[parameterized(
    every_minute = { "* * * * *" },
    midnight = { "0 0 * * *" },
    every_five = { "*/5 * * * *" },
    business_hours = { "0 9-17 * * 1-5" },
    lists = { "0,30 * * * *" },
    stepped_range = { "10-20/2 * * * *" },
    single_values = { "15 3 1 6 0" },
)]
fn accepts_valid_expressions(expr: &str) {
    assert!(CronSchedule::is_valid(expr), "{expr:?} should parse");
}

#[parameterized(
    empty = { "" },
    four_fields = { "* * * *" },
    six_fields = { "* * * * * *" },
    minute_too_big = { "60 * * * *" },
    hour_too_big = { "* 24 * * *" },
    day_zero = { "* * 0 * *" },
    month_13 = { "* * * 13 *" },
    weekday_7 = { "* * * * 7" },
    zero_step = { "*/0 * * * *" },
    inverted_range = { "5-1 * * * *" },
    letters = { "a * * * *" },
)]
fn rejects_invalid_expressions(expr: &str) {
    assert!(!CronSchedule::is_valid(expr), "{expr:?} should not parse");
}

#[test]
fn every_minute_fires_within_sixty_seconds() {
    let schedule = CronSchedule::parse("* * * * *").unwrap();
    let from = utc(2024, 1, 1, 12, 30, 15);
    let next = schedule.next_fire(from, &Tz::UTC).unwrap();
    assert_eq!(next, utc(2024, 1, 1, 12, 31, 0));
    assert!(next > from);
    assert!((next - from).num_seconds() <= 60);
}

#[test]
fn next_fire_is_strictly_after_even_on_a_boundary() {
    let schedule = CronSchedule::parse("* * * * *").unwrap();
    let from = utc(2024, 1, 1, 12, 30, 0);
    assert_eq!(schedule.next_fire(from, &Tz::UTC).unwrap(), utc(2024, 1, 1, 12, 31, 0));
}

#[test]
fn midnight_rolls_to_next_day() {
    let schedule = CronSchedule::parse("0 0 * * *").unwrap();
    let next = schedule.next_fire(utc(2024, 1, 1, 12, 30, 15), &Tz::UTC).unwrap();
    assert_eq!(next, utc(2024, 1, 2, 0, 0, 0));
}

#[test]
fn step_field_snaps_to_next_multiple() {
    let schedule = CronSchedule::parse("*/15 * * * *").unwrap();
    let next = schedule.next_fire(utc(2024, 1, 1, 12, 30, 15), &Tz::UTC).unwrap();
    assert_eq!(next, utc(2024, 1, 1, 12, 45, 0));
}

#[test]
fn weekday_zero_is_sunday() {
    // 2024-01-01 was a Monday; the next Sunday is 2024-01-07.
    let schedule = CronSchedule::parse("30 14 * * 0").unwrap();
    let next = schedule.next_fire(utc(2024, 1, 1, 0, 0, 0), &Tz::UTC).unwrap();
    assert_eq!(next, utc(2024, 1, 7, 14, 30, 0));
}

#[test]
fn matching_happens_in_the_schedule_timezone() {
    // 09:00 in New York (EST, UTC-5 in January) is 14:00 UTC.
    let tz: Tz = "America/New_York".parse().unwrap();
    let schedule = CronSchedule::parse("0 9 * * *").unwrap();
    let next = schedule.next_fire(utc(2024, 1, 1, 12, 0, 0), &tz).unwrap();
    assert_eq!(next, utc(2024, 1, 1, 14, 0, 0));
}

#[test]
fn next_fire_is_monotone_in_the_start_instant() {
    let schedule = CronSchedule::parse("*/10 * * * *").unwrap();
    let base = utc(2024, 1, 1, 0, 0, 30);
    let mut last = schedule.next_fire(base, &Tz::UTC).unwrap();
    for minutes in 1..180i64 {
        let next = schedule.next_fire(base + Duration::minutes(minutes), &Tz::UTC).unwrap();
        assert!(next >= last, "next_fire went backwards at +{minutes}m");
        last = next;
    }
}

#[test]
fn unsatisfiable_expression_fails_explicitly() {
    // February 31st never exists; the four-week search must give up.
    let schedule = CronSchedule::parse("0 0 31 2 *").unwrap();
    let err = schedule.next_fire(utc(2024, 1, 1, 0, 0, 0), &Tz::UTC).unwrap_err();
    assert_eq!(err, CronError::NoUpcomingFire);
}

#[test]
fn consecutive_fires_follow_the_schedule() {
    let schedule = CronSchedule::parse("0,30 * * * *").unwrap();
    let first = schedule.next_fire(utc(2024, 1, 1, 6, 10, 0), &Tz::UTC).unwrap();
    let second = schedule.next_fire(first, &Tz::UTC).unwrap();
    let third = schedule.next_fire(second, &Tz::UTC).unwrap();
    assert_eq!(first, utc(2024, 1, 1, 6, 30, 0));
    assert_eq!(second, utc(2024, 1, 1, 7, 0, 0));
    assert_eq!(third, utc(2024, 1, 1, 7, 30, 0));
}
