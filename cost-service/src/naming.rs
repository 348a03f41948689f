//! Display names derived from upstream feed identifiers.

use cost_client::domain::Interval;

/// Human-readable base name of a feed id: `sensor.house_energy_total` becomes
/// `House Total`.
pub fn friendly_name(feed_id: &str) -> String {
    let base = feed_id.rsplit('.').next().unwrap_or(feed_id);
    base.split(|c: char| c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty() && !w.eq_ignore_ascii_case("energy"))
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

pub fn interval_sensor_name(feed_id: &str, interval: Interval) -> String {
    format!("{} {} Energy Cost", friendly_name(feed_id), interval.label())
}

pub fn real_time_sensor_name(feed_id: &str) -> String {
    format!("{} Real Time Energy Cost", friendly_name(feed_id))
}

pub fn device_name(feed_id: &str) -> String {
    format!("{} Dynamic Energy Cost", friendly_name(feed_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_domain_and_energy_word() {
        assert_eq!(friendly_name("sensor.house_energy_total"), "House Total");
        assert_eq!(friendly_name("sensor.ENERGY_meter"), "Meter");
        assert_eq!(friendly_name("heat_pump"), "Heat Pump");
    }

    #[test]
    fn sensor_and_device_names() {
        assert_eq!(
            interval_sensor_name("sensor.kitchen_energy", Interval::Monthly),
            "Kitchen Monthly Energy Cost"
        );
        assert_eq!(
            real_time_sensor_name("sensor.dryer_power"),
            "Dryer Power Real Time Energy Cost"
        );
        assert_eq!(device_name("sensor.kitchen_energy"), "Kitchen Dynamic Energy Cost");
    }
}
