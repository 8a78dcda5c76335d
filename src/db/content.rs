//! Courses, assignments, chapters and their timed text segments.

use super::sqlite::{LecternStorage, new_id};
use crate::db::models::{
    Assignment, AssignmentUpsert, Chapter, ChapterUpsert, Course, CourseUpsert, Granularity,
    NewSegment, TextSegment,
};
use crate::error::LecternError;
use chrono::Utc;

const COURSE_COLUMNS: &str =
    "id, external_id, title, description, image_url, sort_order, created_at, updated_at";
const ASSIGNMENT_COLUMNS: &str =
    "id, external_id, course_id, title, description, sort_order, created_at, updated_at";
const CHAPTER_COLUMNS: &str = "id, external_id, assignment_id, title, description, audio_url, \
     duration_secs, sort_order, created_at, updated_at";

impl LecternStorage {
    pub async fn list_courses(&self) -> Result<Vec<Course>, LecternError> {
        let sql = format!("SELECT {COURSE_COLUMNS} FROM courses ORDER BY sort_order, title");
        Ok(sqlx::query_as::<_, Course>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn get_course(&self, id: &str) -> Result<Course, LecternError> {
        let sql = format!("SELECT {COURSE_COLUMNS} FROM courses WHERE id = ?");
        sqlx::query_as::<_, Course>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LecternError::NotFound(format!("course {id}")))
    }

    pub async fn list_assignments(&self, course_id: &str) -> Result<Vec<Assignment>, LecternError> {
        let sql = format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE course_id = ? ORDER BY sort_order, title"
        );
        Ok(sqlx::query_as::<_, Assignment>(&sql)
            .bind(course_id)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn get_assignment(&self, id: &str) -> Result<Assignment, LecternError> {
        let sql = format!("SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE id = ?");
        sqlx::query_as::<_, Assignment>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LecternError::NotFound(format!("assignment {id}")))
    }

    pub async fn list_chapters(&self, assignment_id: &str) -> Result<Vec<Chapter>, LecternError> {
        let sql = format!(
            "SELECT {CHAPTER_COLUMNS} FROM chapters WHERE assignment_id = ? ORDER BY sort_order, title"
        );
        Ok(sqlx::query_as::<_, Chapter>(&sql)
            .bind(assignment_id)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn get_chapter(&self, id: &str) -> Result<Chapter, LecternError> {
        let sql = format!("SELECT {CHAPTER_COLUMNS} FROM chapters WHERE id = ?");
        sqlx::query_as::<_, Chapter>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LecternError::NotFound(format!("chapter {id}")))
    }

    /// Segments of a chapter ordered by start time; all granularities when `granularity` is None.
    pub async fn list_segments(
        &self,
        chapter_id: &str,
        granularity: Option<Granularity>,
    ) -> Result<Vec<TextSegment>, LecternError> {
        let rows = match granularity {
            Some(g) => {
                sqlx::query_as::<_, TextSegment>(
                    r#"SELECT id, chapter_id, granularity, position, text, start_time, end_time
                       FROM text_segments WHERE chapter_id = ? AND granularity = ?
                       ORDER BY start_time, position"#,
                )
                .bind(chapter_id)
                .bind(g)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, TextSegment>(
                    r#"SELECT id, chapter_id, granularity, position, text, start_time, end_time
                       FROM text_segments WHERE chapter_id = ?
                       ORDER BY start_time, position"#,
                )
                .bind(chapter_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    /// Upsert by unique external_id. Returns the local row id.
    pub async fn upsert_course(&self, course: &CourseUpsert) -> Result<String, LecternError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO courses (
                id, external_id, title, description, image_url, sort_order, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(external_id) DO UPDATE SET
                title=excluded.title,
                description=excluded.description,
                image_url=excluded.image_url,
                sort_order=excluded.sort_order,
                updated_at=excluded.updated_at
            "#,
        )
        .bind(new_id())
        .bind(&course.external_id)
        .bind(&course.title)
        .bind(&course.description)
        .bind(&course.image_url)
        .bind(course.sort_order)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let rec: (String,) = sqlx::query_as("SELECT id FROM courses WHERE external_id = ?")
            .bind(&course.external_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(rec.0)
    }

    pub async fn upsert_assignment(
        &self,
        assignment: &AssignmentUpsert,
    ) -> Result<String, LecternError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO assignments (
                id, external_id, course_id, title, description, sort_order, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(external_id) DO UPDATE SET
                course_id=excluded.course_id,
                title=excluded.title,
                description=excluded.description,
                sort_order=excluded.sort_order,
                updated_at=excluded.updated_at
            "#,
        )
        .bind(new_id())
        .bind(&assignment.external_id)
        .bind(&assignment.course_id)
        .bind(&assignment.title)
        .bind(&assignment.description)
        .bind(assignment.sort_order)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let rec: (String,) = sqlx::query_as("SELECT id FROM assignments WHERE external_id = ?")
            .bind(&assignment.external_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(rec.0)
    }

    pub async fn upsert_chapter(&self, chapter: &ChapterUpsert) -> Result<String, LecternError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO chapters (
                id, external_id, assignment_id, title, description, audio_url,
                duration_secs, sort_order, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(external_id) DO UPDATE SET
                assignment_id=excluded.assignment_id,
                title=excluded.title,
                description=excluded.description,
                audio_url=excluded.audio_url,
                duration_secs=excluded.duration_secs,
                sort_order=excluded.sort_order,
                updated_at=excluded.updated_at
            "#,
        )
        .bind(new_id())
        .bind(&chapter.external_id)
        .bind(&chapter.assignment_id)
        .bind(&chapter.title)
        .bind(&chapter.description)
        .bind(&chapter.audio_url)
        .bind(chapter.duration_secs)
        .bind(chapter.sort_order)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let rec: (String,) = sqlx::query_as("SELECT id FROM chapters WHERE external_id = ?")
            .bind(&chapter.external_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(rec.0)
    }

    /// Replace every segment of a chapter in one transaction.
    pub async fn replace_segments(
        &self,
        chapter_id: &str,
        segments: &[NewSegment],
    ) -> Result<usize, LecternError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM text_segments WHERE chapter_id = ?")
            .bind(chapter_id)
            .execute(&mut *tx)
            .await?;

        for (position, seg) in segments.iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO text_segments
                   (id, chapter_id, granularity, position, text, start_time, end_time)
                   VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(new_id())
            .bind(chapter_id)
            .bind(seg.granularity)
            .bind(position as i64)
            .bind(&seg.text)
            .bind(seg.start_time)
            .bind(seg.end_time)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(segments.len())
    }

    pub async fn count_courses(&self) -> Result<i64, LecternError> {
        let rec: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM courses")
            .fetch_one(&self.pool)
            .await?;
        Ok(rec.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course(ext: &str, title: &str) -> CourseUpsert {
        CourseUpsert {
            external_id: ext.to_string(),
            title: title.to_string(),
            description: None,
            image_url: None,
            sort_order: 0,
        }
    }

    #[tokio::test]
    async fn upsert_course_matches_on_external_id() {
        let db = LecternStorage::connect_in_memory().await.unwrap();
        let first = db.upsert_course(&course("c-1", "Biology")).await.unwrap();
        let second = db
            .upsert_course(&course("c-1", "Biology II"))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(db.count_courses().await.unwrap(), 1);
        assert_eq!(db.get_course(&first).await.unwrap().title, "Biology II");
    }

    #[tokio::test]
    async fn deleting_course_cascades_to_chapters() {
        let db = LecternStorage::connect_in_memory().await.unwrap();
        let course_id = db.upsert_course(&course("c-1", "Biology")).await.unwrap();
        let assignment_id = db
            .upsert_assignment(&AssignmentUpsert {
                external_id: "a-1".into(),
                course_id: course_id.clone(),
                title: "Cells".into(),
                description: None,
                sort_order: 0,
            })
            .await
            .unwrap();
        let chapter_id = db
            .upsert_chapter(&ChapterUpsert {
                external_id: "ch-1".into(),
                assignment_id,
                title: "Membranes".into(),
                description: None,
                audio_url: Some("https://cdn.example.com/a.mp3".into()),
                duration_secs: Some(60.0),
                sort_order: 0,
            })
            .await
            .unwrap();

        sqlx::query("DELETE FROM courses WHERE id = ?")
            .bind(&course_id)
            .execute(db.pool())
            .await
            .unwrap();

        assert!(matches!(
            db.get_chapter(&chapter_id).await,
            Err(LecternError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn replace_segments_drops_previous_set() {
        let db = LecternStorage::connect_in_memory().await.unwrap();
        let course_id = db.upsert_course(&course("c-1", "Biology")).await.unwrap();
        let assignment_id = db
            .upsert_assignment(&AssignmentUpsert {
                external_id: "a-1".into(),
                course_id,
                title: "Cells".into(),
                description: None,
                sort_order: 0,
            })
            .await
            .unwrap();
        let chapter_id = db
            .upsert_chapter(&ChapterUpsert {
                external_id: "ch-1".into(),
                assignment_id,
                title: "Membranes".into(),
                description: None,
                audio_url: None,
                duration_secs: None,
                sort_order: 0,
            })
            .await
            .unwrap();

        let seg = |g, t: &str, s, e| NewSegment {
            granularity: g,
            text: t.to_string(),
            start_time: s,
            end_time: e,
        };
        db.replace_segments(
            &chapter_id,
            &[
                seg(Granularity::Sentence, "One.", 0.0, 5.0),
                seg(Granularity::Word, "One", 0.0, 0.5),
            ],
        )
        .await
        .unwrap();
        db.replace_segments(&chapter_id, &[seg(Granularity::Sentence, "Two.", 5.0, 10.0)])
            .await
            .unwrap();

        let all = db.list_segments(&chapter_id, None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].text, "Two.");
        let words = db
            .list_segments(&chapter_id, Some(Granularity::Word))
            .await
            .unwrap();
        assert!(words.is_empty());
    }
}
