//! Hand-verified vectors for the schedule grammar (§4.6, §8(d)) against
//! `meerschaum/utils/schedule.py`'s own worked examples.

use chrono::NaiveDate;

use meerschaum_core::scheduler::schedule::Schedule;

fn at(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, mi, s).unwrap()
}

#[test]
fn every_ten_seconds_starting_a_date() {
    let schedule = Schedule::parse("every 10 seconds starting 2024-05-01").unwrap();
    let occurrences = schedule.next_occurrences(3);
    assert_eq!(
        occurrences,
        vec![
            at(2024, 5, 1, 0, 0, 0),
            at(2024, 5, 1, 0, 0, 10),
            at(2024, 5, 1, 0, 0, 20),
        ]
    );
}

#[test]
fn weekday_range_and_interval_combinator_skips_the_sunday() {
    let schedule = Schedule::parse("mon-fri and every 2 days starting 2024-05-13").unwrap();
    let occurrences = schedule.next_occurrences(4);
    assert_eq!(
        occurrences,
        vec![
            at(2024, 5, 13, 0, 0, 0),
            at(2024, 5, 15, 0, 0, 0),
            at(2024, 5, 17, 0, 0, 0),
            at(2024, 5, 21, 0, 0, 0), // 05-19 is a Sunday, excluded
        ]
    );
}

#[test]
fn daily_alias_expands_to_every_one_day() {
    let aliased = Schedule::parse("daily starting 2024-01-01").unwrap();
    let literal = Schedule::parse("every 1 day starting 2024-01-01").unwrap();
    assert_eq!(aliased.next_occurrences(5), literal.next_occurrences(5));
}

#[test]
fn or_combinator_merges_both_terms_streams() {
    let schedule = Schedule::parse("every 1 day or every 3 days starting 2024-01-01").unwrap();
    let occurrences = schedule.next_occurrences(3);
    // Day 1 (both), day 2 (daily only), day 3 (daily and the 3-day term again)
    // collapse via the merge's dedup -- the union is just daily.
    assert_eq!(
        occurrences,
        vec![at(2024, 1, 1, 0, 0, 0), at(2024, 1, 2, 0, 0, 0), at(2024, 1, 3, 0, 0, 0)]
    );
}

#[test]
fn mixing_and_and_or_is_rejected() {
    let err = Schedule::parse("mon-fri and every 1 day or weekly").unwrap_err();
    assert_eq!(err.kind(), meerschaum_core::ErrorKind::Config);
}
