use time::Date;

/// Maps the portal's reported date to the date a reading is attributed to.
pub struct DateResolver;

impl DateResolver {
    /// Before its morning refresh the portal echoes a first-of-month
    /// placeholder, so such dates are attributed to yesterday.
    pub fn resolve(reported_date: Date, today: Date) -> Date {
        if reported_date.day() == 1 {
            today.previous_day().unwrap_or(today)
        } else {
            reported_date
        }
    }
}
