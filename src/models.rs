use std::{fmt, str::FromStr};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use diesel::{
    AsChangeset, AsExpression, FromSqlRow, Selectable,
    deserialize::{self, FromSql},
    pg::{Pg, PgValue},
    prelude::{Identifiable, Insertable, Queryable},
    serialize::{self, Output, ToSql},
    sql_types::Text,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Declares an enum persisted as a `TEXT` column and serialized with the same spelling.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema,
            AsExpression, FromSqlRow,
        )]
        #[diesel(sql_type = Text)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} value: {other}", stringify!($name))),
                }
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                <str as ToSql<Text, Pg>>::to_sql(self.as_str(), out)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
                raw.parse::<$name>().map_err(|err| err.into())
            }
        }
    };
}

text_enum! {
    /// PENDING -> CANCELLED | SENT, SENT -> ACKNOWLEDGED.
    AlertStatus {
        Pending => "PENDING",
        Sent => "SENT",
        Acknowledged => "ACKNOWLEDGED",
        Cancelled => "CANCELLED",
    }
}

impl AlertStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Acknowledged | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: AlertStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Cancelled)
                | (Self::Pending, Self::Sent)
                | (Self::Sent, Self::Acknowledged)
        )
    }
}

text_enum! {
    AlertType {
        Fall => "FALL",
        Manual => "MANUAL",
    }
}

text_enum! {
    DoseStatus {
        Taken => "TAKEN",
        LateDose => "LATE_DOSE",
        Skipped => "SKIPPED",
    }
}

text_enum! {
    RelationshipKind {
        Doctor => "DOCTOR",
        Relative => "RELATIVE",
    }
}

text_enum! {
    UserRole {
        Patient => "PATIENT",
        Doctor => "DOCTOR",
        Relative => "RELATIVE",
    }
}

text_enum! {
    DeviceKind {
        Android => "ANDROID",
        Ios => "IOS",
    }
}

// Users

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserEntity {
    pub id: i32,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub created_at: NaiveDateTime,
}

impl UserEntity {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

// Care relationships

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::care_relationships)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RelationshipEntity {
    pub id: i32,
    pub patient_id: i32,
    pub caregiver_id: i32,
    pub kind: RelationshipKind,
    pub is_primary_contact: bool,
    pub is_active: bool,
}

// Alerts

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::alerts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AlertEntity {
    pub id: i32,
    pub patient_id: i32,
    pub alert_type: AlertType,
    pub created_at: NaiveDateTime,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: AlertStatus,
    pub details: Option<String>,
    pub acknowledged_by: Option<i32>,
    pub version: i32,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::alerts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateAlertEntity {
    pub patient_id: i32,
    pub alert_type: AlertType,
    pub created_at: NaiveDateTime,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: AlertStatus,
    pub details: Option<String>,
}

// Medication schedules

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::medication_schedules)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ScheduleEntity {
    pub id: i32,
    pub patient_id: i32,
    pub doctor_id: Option<i32>,
    pub medication_name: String,
    pub dosage: Option<String>,
    pub notes: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_prn: bool,
    pub is_active: bool,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::medication_schedules)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateScheduleEntity {
    pub patient_id: i32,
    pub doctor_id: Option<i32>,
    pub medication_name: String,
    pub dosage: Option<String>,
    pub notes: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_prn: bool,
    pub is_active: bool,
}

/// Full replacement of a schedule's editable columns. `None` clears nullable columns.
#[derive(AsChangeset, Debug, Clone)]
#[diesel(table_name = crate::schema::medication_schedules)]
#[diesel(treat_none_as_null = true)]
pub struct ScheduleChangeset {
    pub medication_name: String,
    pub dosage: Option<String>,
    pub notes: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_prn: bool,
    pub is_active: bool,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::schedule_slots)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SlotEntity {
    pub id: i32,
    pub schedule_id: i32,
    /// `None` for as-needed (PRN) medication.
    pub time_of_day: Option<NaiveTime>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::schedule_slots)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateSlotEntity {
    pub schedule_id: i32,
    pub time_of_day: Option<NaiveTime>,
}

// Dose records

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::dose_records)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DoseRecordEntity {
    pub id: i32,
    pub slot_id: i32,
    pub patient_id: i32,
    pub taken_at: NaiveDateTime,
    pub status: DoseStatus,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::dose_records)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateDoseRecordEntity {
    pub slot_id: i32,
    pub patient_id: i32,
    pub taken_at: NaiveDateTime,
    pub status: DoseStatus,
}

/// A dose record joined with the medication it belongs to.
#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct DoseView {
    pub id: i32,
    pub slot_id: i32,
    pub patient_id: i32,
    pub taken_at: NaiveDateTime,
    pub status: DoseStatus,
    pub medication_name: String,
}

impl DoseView {
    pub fn new(record: DoseRecordEntity, medication_name: String) -> Self {
        Self {
            id: record.id,
            slot_id: record.slot_id,
            patient_id: record.patient_id,
            taken_at: record.taken_at,
            status: record.status,
            medication_name,
        }
    }
}

// Device tokens

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::device_tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DeviceTokenEntity {
    pub id: i32,
    pub user_id: i32,
    pub token: String,
    pub device_kind: DeviceKind,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::device_tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateDeviceTokenEntity {
    pub user_id: i32,
    pub token: String,
    pub device_kind: DeviceKind,
    pub updated_at: NaiveDateTime,
}
