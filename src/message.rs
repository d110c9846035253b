use crate::portal::WorkHistory;
use crate::types::Vehicle;
use chrono::NaiveDateTime;
use std::fmt::Write;

/// Reduces a phone number to the ten-digit local form (`0XXXXXXXXX`).
/// Numbers that match none of the known shapes come back as bare digits.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        12 if digits.starts_with("380") => digits[2..].to_string(),
        11 if digits.starts_with("80") => digits[1..].to_string(),
        10 if digits.starts_with('0') => digits,
        9 => format!("0{}", digits),
        _ => digits,
    }
}

/// `2023-04-01 10:22:13.5000` becomes `2023-04-01`; anything unparsable is
/// shown as is.
fn registration_date(open_time: &str) -> Option<String> {
    let open_time = open_time.trim();
    if open_time.is_empty() {
        return None;
    }
    match NaiveDateTime::parse_from_str(open_time, "%Y-%m-%d %H:%M:%S%.f") {
        Ok(parsed) => Some(parsed.format("%Y-%m-%d").to_string()),
        Err(_) => Some(open_time.to_string()),
    }
}

fn contacts(vehicle: &Vehicle) -> String {
    let mut text = String::new();
    for name in [&vehicle.surname, &vehicle.first_name, &vehicle.patronymic]
        .into_iter()
        .flatten()
        .filter(|name| !name.trim().is_empty())
    {
        let _ = write!(text, "{} ", name.trim());
    }

    let mut phones: Vec<String> = Vec::new();
    for phone in vehicle.phones.iter().flatten() {
        let phone = normalize_phone(phone);
        if !phone.is_empty() && !phones.contains(&phone) {
            phones.push(phone);
        }
    }
    for phone in &phones {
        let _ = write!(text, "\n{}", phone);
    }

    let _ = write!(text, "\nБаланс: {:.2}", vehicle.balance);
    if let Some(date) = vehicle.open_time.as_deref().and_then(registration_date) {
        let _ = write!(text, "\nБыл в программе: {}", date);
    }
    text
}

/// What the police registry said about a plate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoliceReport {
    pub source: String,
    pub info: Option<String>,
}

pub fn compose(
    plate: &str,
    vehicle: &Vehicle,
    reason: &str,
    police: &PoliceReport,
    history: Option<&WorkHistory>,
) -> String {
    let mut text = format!(
        "{} - позывной: {}, марка:  {}, год: {}, цвет: {}\n\n{}",
        plate,
        vehicle.signal,
        vehicle.make,
        vehicle.year,
        vehicle.color,
        contacts(vehicle)
    );
    match &police.info {
        Some(info) => {
            let _ = write!(text, "\n\nПо данным сайта {}: {}", police.source, info);
        }
        None => {
            let _ = write!(
                text,
                "\n\nПо данным сайта {}: отсутствуют данные по номеру {}",
                police.source, plate
            );
        }
    }
    let _ = write!(text, "\n\nПричина блокировки - {}", reason);
    if let Some(history) = history.filter(|history| !history.firms.is_empty()) {
        let _ = write!(text, "\nРаботает в {}", history.firms.join(", "));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_shapes() {
        assert_eq!(normalize_phone("+380501234567"), "0501234567");
        assert_eq!(normalize_phone("380501234567"), "0501234567");
        assert_eq!(normalize_phone("80501234567"), "0501234567");
        assert_eq!(normalize_phone("0501234567"), "0501234567");
        assert_eq!(normalize_phone("501234567"), "0501234567");
    }

    #[test]
    fn phone_punctuation_and_unknown_shapes() {
        assert_eq!(normalize_phone("+38 (050) 123-45-67"), "0501234567");
        assert_eq!(normalize_phone("12345"), "12345");
        assert_eq!(normalize_phone("-"), "");
    }

    #[test]
    fn registration_date_formats() {
        assert_eq!(
            registration_date("2023-04-01 10:22:13.5000").as_deref(),
            Some("2023-04-01")
        );
        assert_eq!(
            registration_date("2023-04-01 10:22:13").as_deref(),
            Some("2023-04-01")
        );
        assert_eq!(registration_date("01.04.2023").as_deref(), Some("01.04.2023"));
        assert_eq!(registration_date("  "), None);
    }

    fn vehicle() -> Vehicle {
        Vehicle {
            signal: "417".to_string(),
            make: "Skoda Octavia".to_string(),
            year: "2015".to_string(),
            color: "white".to_string(),
            open_time: Some("2023-04-01 10:22:13.5000".to_string()),
            balance: -12.5,
            surname: Some("Shevchenko".to_string()),
            first_name: Some("Taras".to_string()),
            patronymic: None,
            phones: vec![
                Some("+380501234567".to_string()),
                Some("0501234567".to_string()),
                None,
            ],
        }
    }

    #[test]
    fn composes_full_message() {
        let police = PoliceReport {
            source: "baza-gai.com.ua".to_string(),
            info: Some("Skoda Octavia 2015".to_string()),
        };
        let history = WorkHistory {
            callsign: "417".to_string(),
            firms: vec!["Джет".to_string(), "Флай".to_string()],
        };
        let text = compose("AA1234BC", &vehicle(), "stolen", &police, Some(&history));
        assert_eq!(
            text,
            "AA1234BC - позывной: 417, марка:  Skoda Octavia, год: 2015, цвет: white\n\n\
             Shevchenko Taras \n0501234567\nБаланс: -12.50\nБыл в программе: 2023-04-01\n\n\
             По данным сайта baza-gai.com.ua: Skoda Octavia 2015\n\n\
             Причина блокировки - stolen\n\
             Работает в Джет, Флай"
        );
    }

    #[test]
    fn missing_police_data_is_reported_inline() {
        let police = PoliceReport {
            source: "baza-gai.com.ua".to_string(),
            info: None,
        };
        let text = compose("AA1234BC", &Vehicle::default(), "stolen", &police, None);
        assert!(text.contains("отсутствуют данные по номеру AA1234BC"));
        assert!(text.ends_with("Причина блокировки - stolen"));
        assert!(!text.contains("Был в программе"));
    }
}
