use chrono::NaiveDate;

/// Name of the record file holding one UTC day.
pub fn date_to_record_name(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_name_is_sortable() {
        let a = date_to_record_name(NaiveDate::from_ymd_opt(2018, 7, 4).unwrap());
        let b = date_to_record_name(NaiveDate::from_ymd_opt(2018, 12, 1).unwrap());
        assert_eq!(a, "2018-07-04");
        assert!(a < b);
    }
}
