use keyturn::domain::secret::MAX_ROTATION_DAYS;
use keyturn::domain::{RotationSchedule, ScopeId};
use keyturn::services::deployment_service::{
    extract_lock_id, parse_function_ref, workspace_name,
};
use proptest::prelude::*;

proptest! {
    #[test]
    fn day_schedules_parse_back_from_display(days in 1..=MAX_ROTATION_DAYS) {
        let schedule = RotationSchedule::EveryDays(days);
        prop_assert_eq!(schedule.to_string().parse::<RotationSchedule>(), Ok(schedule));
    }

    #[test]
    fn every_day_form_is_accepted(days in 1..=MAX_ROTATION_DAYS) {
        let expected = Ok(RotationSchedule::EveryDays(days));
        prop_assert_eq!(format!("rate({} days)", days).parse::<RotationSchedule>(), expected.clone());
        prop_assert_eq!(format!("{}d", days).parse::<RotationSchedule>(), expected.clone());
        prop_assert_eq!(format!("  Every {} Days ", days).parse::<RotationSchedule>(), expected);
    }

    #[test]
    fn day_counts_out_of_range_are_rejected(days in (MAX_ROTATION_DAYS + 1)..=u32::MAX) {
        let input = format!("every {} days", days);
        prop_assert!(input.parse::<RotationSchedule>().is_err());
    }

    #[test]
    fn workspace_names_are_prefixed_and_safe(scope in "[A-Za-z0-9._:/ -]{1,40}") {
        let name = workspace_name(&ScopeId::from_str_unchecked(&scope));
        let suffix = name.strip_prefix("keyturn-").unwrap();
        prop_assert_eq!(suffix.chars().count(), scope.chars().count());
        prop_assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn lock_id_is_found_in_lock_errors(
        preamble in "[A-Za-z ,.]{0,60}",
        lock_id in "[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
    ) {
        let output = format!(
            "{}\nError: Error acquiring the state lock\n\nLock Info:\n  ID:        {}\n  {}\n",
            preamble, lock_id, "Operation: OperationTypeApply"
        );
        prop_assert_eq!(extract_lock_id(&output), Some(lock_id));
    }

    #[test]
    fn keyed_function_ref_is_parsed(
        account in "[0-9]{12}",
        function in "[A-Za-z0-9_-]{1,40}",
    ) {
        let arn = format!("arn:aws:lambda:us-east-1:{}:function:{}", account, function);
        let stdout = format!("Apply complete!\n\nOutputs:\n\nrotation_function_arn = \"{}\"\n", arn);
        prop_assert_eq!(parse_function_ref("rotation_function_arn", &stdout).unwrap(), arn);
    }
}
