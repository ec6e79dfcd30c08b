//! Build id stamped by build.rs: YYYY.MM.DD+g<short-sha>

#[test]
fn test_build_id_format() {
    let build_id = option_env!("BALANCELOG_BUILD_ID").unwrap_or("unknown");
    println!("Build ID: {build_id}");

    if build_id == "unknown" {
        return;
    }

    let (date, git) = build_id
        .split_once('+')
        .expect("date and git parts separated by +");

    let pieces: Vec<&str> = date.split('.').collect();
    assert_eq!(pieces.len(), 3, "date should be YYYY.MM.DD");
    assert_eq!(pieces[0].len(), 4);
    pieces[0].parse::<u16>().expect("year");
    let month: u8 = pieces[1].parse().expect("month");
    assert!((1..=12).contains(&month));
    let day: u8 = pieces[2].parse().expect("day");
    assert!((1..=31).contains(&day));

    let sha = git.strip_prefix('g').expect("git part starts with g");
    // Builds outside a git checkout carry "unknown"
    assert!(sha == "unknown" || (!sha.is_empty() && sha.chars().all(|c| c.is_ascii_hexdigit())));
}
